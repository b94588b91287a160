//! Static rules disabled by subscription diffs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{RuleId, SubscriptionId};

/// Per-subscription set of disabled static rule ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticDisableSet {
    by_subscription: BTreeMap<SubscriptionId, BTreeSet<RuleId>>,
}

impl StaticDisableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disabled(&self, subscription: &SubscriptionId, rule_id: RuleId) -> bool {
        self.by_subscription
            .get(subscription)
            .is_some_and(|ids| ids.contains(&rule_id))
    }

    /// Disabled rule ids of one subscription.
    pub fn disabled(&self, subscription: &SubscriptionId) -> BTreeSet<RuleId> {
        self.by_subscription
            .get(subscription)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the disabled set of `subscription`, returning the previous one.
    pub fn replace(
        &mut self,
        subscription: &SubscriptionId,
        ids: BTreeSet<RuleId>,
    ) -> BTreeSet<RuleId> {
        let previous = if ids.is_empty() {
            self.by_subscription.remove(subscription)
        } else {
            self.by_subscription.insert(subscription.clone(), ids)
        };
        previous.unwrap_or_default()
    }

    /// Re-enable every static rule of `subscription`.
    pub fn clear(&mut self, subscription: &SubscriptionId) -> BTreeSet<RuleId> {
        self.by_subscription.remove(subscription).unwrap_or_default()
    }

    /// Number of disabled static rules across all subscriptions.
    pub fn count(&self) -> usize {
        self.by_subscription.values().map(BTreeSet::len).sum()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &SubscriptionId> + '_ {
        self.by_subscription.keys()
    }
}
