//! Startup recovery
//!
//! Diff-derived state does not survive a restart: every diff-updatable
//! subscription goes back to its build-time baseline and has to sync again.
//! References held by the user sentinel are never dropped here, so a user
//! filter that a subscription also added stays installed.

use std::collections::BTreeSet;

use crate::state::RuleState;
use crate::static_rules::StaticRuleIndex;
use crate::subscription::SubscriptionStore;
use crate::types::SubscriptionId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Subscriptions reverted to their baseline
    pub reset: Vec<SubscriptionId>,
    pub freed_rules: usize,
    pub reenabled_rules: usize,
    /// Removed subscriptions whose last filter set was discarded
    pub retired_dropped: usize,
}

/// Discard diff-derived rule state after a process restart.
pub fn recover_after_restart(
    store: &mut SubscriptionStore,
    rules: &mut RuleState,
    statics: &StaticRuleIndex,
) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    // Plain subscriptions never hold diff state; anything else that shows up
    // as an owner or in the disable set is stale.
    let keep: BTreeSet<SubscriptionId> = store
        .iter()
        .filter(|sub| !sub.is_updatable())
        .map(|sub| sub.id().clone())
        .collect();

    let mut stale: BTreeSet<SubscriptionId> = rules
        .dynamic()
        .records()
        .flat_map(|record| record.owners().filter_map(|(owner, _)| owner.subscription().cloned()))
        .collect();
    stale.extend(rules.disabled().subscriptions().cloned());
    stale.extend(
        store
            .iter()
            .filter(|sub| sub.is_updatable())
            .map(|sub| sub.id().clone()),
    );

    for id in stale.difference(&keep) {
        let released = rules.release_subscription(id);
        report.freed_rules += released.freed_rules;
        report.reenabled_rules += released.reenabled_rules;
    }

    for sub in store.iter_mut().filter(|sub| sub.is_updatable()) {
        sub.replace_active_filters(statics.baseline(sub.id()));
        sub.set_last_applied_version(None);
        report.reset.push(sub.id().clone());
    }
    report.retired_dropped = store.clear_retired();

    log::info!(
        "Restart recovery: reset {} subscription(s), freed {} dynamic rule(s), re-enabled {} static rule(s)",
        report.reset.len(),
        report.freed_rules,
        report.reenabled_rules,
    );
    report
}
