//! Installed rule state
//!
//! `RuleState` owns the three quota-relevant stores: the quota counters, the
//! dynamic filter table and the static disable set. Everything that changes
//! rule slots goes through `&mut RuleState`, which makes every
//! check-then-commit exclusive across subscriptions.

use std::collections::BTreeSet;

use crate::diff::RuleCompiler;
use crate::disabled::StaticDisableSet;
use crate::dynamic::{Acquired, DynamicFilterTable, Released};
use crate::error::{QuotaExceeded, UserFilterError};
use crate::quota::{QuotaDelta, QuotaLimits, QuotaManager, QuotaUsage};
use crate::types::{FilterText, Owner, RuleId, SubscriptionId};

/// What releasing a subscription's rules gave back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReleaseReport {
    /// Dynamic rule slots freed because the subscription was the last owner
    pub freed_rules: usize,
    /// References dropped on records that other owners keep alive
    pub retained_records: usize,
    /// Static rules enabled again
    pub reenabled_rules: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleState {
    quota: QuotaManager,
    dynamic: DynamicFilterTable,
    disabled: StaticDisableSet,
}

impl RuleState {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            quota: QuotaManager::new(limits),
            dynamic: DynamicFilterTable::new(),
            disabled: StaticDisableSet::new(),
        }
    }

    /// Rebuild from persisted stores. Usage is recounted from the stores.
    pub fn from_parts(
        limits: QuotaLimits,
        dynamic: DynamicFilterTable,
        disabled: StaticDisableSet,
    ) -> Self {
        let mut state = Self {
            quota: QuotaManager::new(limits),
            dynamic,
            disabled,
        };
        state.recount();
        state
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    pub fn set_limits(&mut self, limits: QuotaLimits) {
        self.quota.set_limits(limits);
    }

    pub fn usage(&self) -> QuotaUsage {
        self.quota.usage()
    }

    pub fn dynamic(&self) -> &DynamicFilterTable {
        &self.dynamic
    }

    pub fn disabled(&self) -> &StaticDisableSet {
        &self.disabled
    }

    /// Usage as counted from the stores.
    pub fn counted_usage(&self) -> QuotaUsage {
        QuotaUsage {
            dynamic_rules: self.dynamic.rule_count(),
            disabled_static_rules: self.disabled.count(),
        }
    }

    pub(crate) fn recount(&mut self) {
        let usage = self.counted_usage();
        self.quota.reset_usage(usage);
    }

    /// Check `projected` against the quota and record it on success.
    pub(crate) fn try_reserve(&mut self, projected: QuotaUsage) -> Result<QuotaUsage, QuotaExceeded> {
        let delta = QuotaDelta::between(self.quota.usage(), projected);
        self.quota.try_commit(delta)
    }

    pub(crate) fn swap_dynamic(&mut self, table: DynamicFilterTable) -> DynamicFilterTable {
        std::mem::replace(&mut self.dynamic, table)
    }

    pub(crate) fn swap_disabled(
        &mut self,
        subscription: &SubscriptionId,
        ids: BTreeSet<RuleId>,
    ) -> BTreeSet<RuleId> {
        self.disabled.replace(subscription, ids)
    }

    /// Drop every rule a subscription holds.
    ///
    /// Records the subscription owned alone are freed, shared records lose the
    /// subscription as owner, and its disabled static rules are enabled again.
    pub fn release_subscription(&mut self, subscription: &SubscriptionId) -> ReleaseReport {
        let owner = Owner::Subscription(subscription.clone());
        let mut report = ReleaseReport::default();

        for (filter, released) in self.dynamic.release_all(&owner) {
            match released {
                Released::Freed(ids) => {
                    log::debug!("Freed {} rule(s) of {} held by {}", ids.len(), filter, subscription);
                    report.freed_rules += ids.len();
                }
                Released::Retained => report.retained_records += 1,
                Released::NotOwned => {}
            }
        }
        report.reenabled_rules = self.disabled.clear(subscription).len();
        self.recount();
        report
    }

    /// Filters held by the user sentinel.
    pub fn user_filters(&self) -> Vec<FilterText> {
        self.dynamic.filters_owned_by(&Owner::User).cloned().collect()
    }

    /// Install a user filter, sharing an existing record when there is one.
    ///
    /// Adding a filter the user already owns changes nothing.
    pub fn add_user_filter(
        &mut self,
        filter: &FilterText,
        compiler: &dyn RuleCompiler,
    ) -> Result<Acquired, UserFilterError> {
        if let Some(record) = self.dynamic.get(filter) {
            if record.is_owned_by(&Owner::User) {
                return Ok(Acquired::Shared);
            }
            return Ok(self.dynamic.acquire(filter, Owner::User, |_| Ok(0))?);
        }

        let slots = compiler.compile(filter)?;
        let mut projected = self.quota.usage();
        projected.dynamic_rules += slots;
        self.try_reserve(projected)?;

        match self.dynamic.acquire(filter, Owner::User, |_| Ok(slots)) {
            Ok(acquired) => Ok(acquired),
            Err(err) => {
                self.recount();
                Err(err.into())
            }
        }
    }

    /// Drop the user's reference on a filter. Subscription references are kept.
    pub fn remove_user_filter(&mut self, filter: &FilterText) -> Result<Released, UserFilterError> {
        match self.dynamic.release(filter, &Owner::User) {
            Released::NotOwned => Err(UserFilterError::NotFound(filter.clone())),
            released => {
                self.recount();
                Ok(released)
            }
        }
    }
}
