//! Subscription metadata and the subscription store.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{DownloadStatus, FilterText, SubscriptionId};

/// Downloads beyond this are reported as "4+".
const DOWNLOAD_COUNT_CAP: u32 = 4;

/// Options for adding a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    /// Endpoint serving diffs; `None` for lists that are never diff-updated
    pub diff_endpoint: Option<String>,
    pub enabled: bool,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            diff_endpoint: None,
            enabled: true,
        }
    }
}

/// A filter list subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    id: SubscriptionId,
    diff_endpoint: Option<String>,
    enabled: bool,
    last_applied_version: Option<String>,
    download_count: u32,
    download_status: Option<DownloadStatus>,
    /// Filters currently in effect. For a disabled subscription this is the
    /// last committed set, replayed on enable.
    active_filters: BTreeSet<FilterText>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        options: SubscriptionOptions,
        baseline: BTreeSet<FilterText>,
    ) -> Self {
        Self {
            id,
            diff_endpoint: options.diff_endpoint,
            enabled: options.enabled,
            last_applied_version: None,
            download_count: 0,
            download_status: None,
            active_filters: baseline,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn url(&self) -> &str {
        self.id.as_str()
    }

    pub fn diff_endpoint(&self) -> Option<&str> {
        self.diff_endpoint.as_deref()
    }

    /// Whether the subscription receives diff updates.
    pub fn is_updatable(&self) -> bool {
        self.diff_endpoint.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_applied_version(&self) -> Option<&str> {
        self.last_applied_version.as_deref()
    }

    pub fn download_count(&self) -> u32 {
        self.download_count
    }

    pub fn download_status(&self) -> Option<&DownloadStatus> {
        self.download_status.as_ref()
    }

    pub fn active_filters(&self) -> &BTreeSet<FilterText> {
        &self.active_filters
    }

    /// Returns true if the flag changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.enabled != enabled;
        self.enabled = enabled;
        changed
    }

    /// Returns true if the status changed.
    pub fn set_download_status(&mut self, status: DownloadStatus) -> bool {
        let changed = self.download_status.as_ref() != Some(&status);
        self.download_status = Some(status);
        changed
    }

    /// Count one successful download.
    pub fn record_download(&mut self) {
        self.download_count = self.download_count.saturating_add(1);
    }

    pub(crate) fn set_last_applied_version(&mut self, version: Option<String>) -> bool {
        let changed = self.last_applied_version != version;
        self.last_applied_version = version;
        changed
    }

    pub(crate) fn replace_active_filters(
        &mut self,
        filters: BTreeSet<FilterText>,
    ) -> BTreeSet<FilterText> {
        std::mem::replace(&mut self.active_filters, filters)
    }

    /// Reporting snapshot.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            url: self.url().to_string(),
            enabled: self.enabled,
            download_status: self.download_status.clone(),
            updatable: self.is_updatable(),
            diff_endpoint: self.diff_endpoint.clone(),
            last_version: self.last_applied_version.clone(),
            download_count: download_count_label(self.download_count),
            filter_count: self.active_filters.len(),
        }
    }
}

/// Reported download count: exact up to 4, then "4+".
pub fn download_count_label(count: u32) -> String {
    if count > DOWNLOAD_COUNT_CAP {
        format!("{DOWNLOAD_COUNT_CAP}+")
    } else {
        count.to_string()
    }
}

/// Public view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub url: String,
    pub enabled: bool,
    pub download_status: Option<DownloadStatus>,
    pub updatable: bool,
    pub diff_endpoint: Option<String>,
    pub last_version: Option<String>,
    pub download_count: String,
    pub filter_count: usize,
}

/// Subscriptions plus the last committed filter sets of removed ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionStore {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    #[serde(default)]
    retired: BTreeMap<SubscriptionId, BTreeSet<FilterText>>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(id)
    }

    pub fn get_mut(&mut self, id: &SubscriptionId) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(id)
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.contains_key(id)
    }

    pub fn insert(&mut self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.id().clone(), subscription);
    }

    /// Remove a subscription, keeping its filter set for a later re-add.
    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(id)?;
        if subscription.is_updatable() {
            self.retired
                .insert(id.clone(), subscription.active_filters.clone());
        }
        Some(subscription)
    }

    /// Take the filter set a removed subscription last committed.
    pub fn take_retired(&mut self, id: &SubscriptionId) -> Option<BTreeSet<FilterText>> {
        self.retired.remove(id)
    }

    pub fn clear_retired(&mut self) -> usize {
        let count = self.retired.len();
        self.retired.clear();
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> + '_ {
        self.subscriptions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subscription> + '_ {
        self.subscriptions.values_mut()
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
