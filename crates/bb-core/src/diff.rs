//! Diff application
//!
//! A diff lists filter lines added to and removed from a subscription since
//! the state it was computed against. Applying one runs a transaction:
//!
//! 1. Stage the changes on a working copy of the dynamic table and of the
//!    subscription's disabled static rules.
//! 2. Project quota usage from the working copy.
//! 3. Either reject the whole diff (nothing installed changes) or swap the
//!    working copy in, returning an [`Undo`] that restores the previous state.
//!
//! Filters are matched against the subscription's active set, so applying a
//! diff that is already in effect changes nothing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dynamic::{Acquired, DynamicFilterTable, Released};
use crate::error::{FilterError, QuotaExceeded};
use crate::event::{Outbox, SubscriptionProperty};
use crate::quota::QuotaUsage;
use crate::state::RuleState;
use crate::static_rules::StaticRuleIndex;
use crate::subscription::Subscription;
use crate::types::{DownloadStatus, FilterText, Owner, RuleId, SubscriptionId};

/// Turns filter text into dynamic rules.
pub trait RuleCompiler {
    /// Number of dynamic rule slots `filter` needs.
    fn compile(&self, filter: &FilterText) -> Result<usize, FilterError>;
}

/// Added and removed filter lines of one subscription update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Diff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Version of the list this diff brings the subscription to
    pub version: Option<String>,
}

impl Diff {
    pub fn new<A, R>(added: A, removed: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            added: added.into_iter().map(Into::into).collect(),
            removed: removed.into_iter().map(Into::into).collect(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Added filter line that was dropped from the diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFilter {
    pub text: String,
    pub error: FilterError,
}

/// What a committed diff changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffReport {
    pub added: Vec<FilterText>,
    pub removed: Vec<FilterText>,
    pub skipped: Vec<SkippedFilter>,
    pub usage: QuotaUsage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(DiffReport),
    Rejected(QuotaExceeded),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

/// Staged, uncommitted changes for one subscription.
#[derive(Debug, Clone)]
pub struct SyncTransaction {
    subscription: SubscriptionId,
    dynamic: DynamicFilterTable,
    disabled: BTreeSet<RuleId>,
    active: BTreeSet<FilterText>,
    added: Vec<FilterText>,
    removed: Vec<FilterText>,
    skipped: Vec<SkippedFilter>,
}

impl SyncTransaction {
    pub fn added(&self) -> &[FilterText] {
        &self.added
    }

    pub fn removed(&self) -> &[FilterText] {
        &self.removed
    }

    pub fn skipped(&self) -> &[SkippedFilter] {
        &self.skipped
    }

    /// Quota usage if this transaction were committed on top of `rules`.
    pub fn projected_usage(&self, rules: &RuleState) -> QuotaUsage {
        let current = rules.disabled().disabled(&self.subscription).len();
        QuotaUsage {
            dynamic_rules: self.dynamic.rule_count(),
            disabled_static_rules: rules.disabled().count() - current + self.disabled.len(),
        }
    }
}

/// State captured before a transaction touched anything.
#[must_use]
#[derive(Debug, Clone)]
pub struct Undo {
    subscription: Subscription,
    rules: Option<(DynamicFilterTable, BTreeSet<RuleId>)>,
}

impl Undo {
    /// Put `rules` and `subscription` back to their pre-transaction state.
    pub fn restore(self, rules: &mut RuleState, subscription: &mut Subscription) {
        if let Some((dynamic, disabled)) = self.rules {
            rules.swap_dynamic(dynamic);
            rules.swap_disabled(subscription.id(), disabled);
            rules.recount();
        }
        *subscription = self.subscription;
    }
}

/// Result of running a transaction.
#[derive(Debug)]
pub struct Applied {
    pub outcome: ApplyOutcome,
    pub outbox: Outbox,
    pub undo: Undo,
}

/// How a committed transaction updates subscription metadata.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CommitMode {
    /// A freshly downloaded diff: status becomes ok, version advances
    Download,
    /// Reinstalling the last committed filter set: metadata is kept
    Replay,
}

/// Stages and commits diffs against the installed rule state.
pub struct DiffApplier<'a> {
    statics: &'a StaticRuleIndex,
    compiler: &'a dyn RuleCompiler,
}

impl<'a> DiffApplier<'a> {
    pub fn new(statics: &'a StaticRuleIndex, compiler: &'a dyn RuleCompiler) -> Self {
        Self { statics, compiler }
    }

    /// Stage `diff` without touching `rules` or `subscription`.
    pub fn stage(&self, rules: &RuleState, subscription: &Subscription, diff: &Diff) -> SyncTransaction {
        let id = subscription.id();
        let owner = Owner::Subscription(id.clone());
        let ruleset = self.statics.ruleset(id);

        let mut tx = SyncTransaction {
            subscription: id.clone(),
            dynamic: rules.dynamic().clone(),
            disabled: rules.disabled().disabled(id),
            active: subscription.active_filters().clone(),
            added: Vec::new(),
            removed: Vec::new(),
            skipped: Vec::new(),
        };

        let removed: Vec<FilterText> = diff
            .removed
            .iter()
            .filter_map(|raw| FilterText::new(raw).ok())
            .collect();
        let removed_set: BTreeSet<&FilterText> = removed.iter().collect();

        for filter in &removed {
            if !tx.active.remove(filter) {
                continue;
            }
            if let Some(ids) = ruleset.and_then(|r| r.rule_ids(filter)) {
                tx.disabled.extend(ids.iter().copied());
            }
            if let Released::Freed(ids) = tx.dynamic.release(filter, &owner) {
                log::debug!("{}: staged freeing {} rule(s) of {}", id, ids.len(), filter);
            }
            tx.removed.push(filter.clone());
        }

        for raw in &diff.added {
            let filter = match FilterText::new(raw) {
                Ok(filter) => filter,
                Err(error) => {
                    tx.skipped.push(SkippedFilter {
                        text: raw.clone(),
                        error,
                    });
                    continue;
                }
            };
            if removed_set.contains(&filter) || tx.active.contains(&filter) {
                continue;
            }

            if let Some(ids) = ruleset.and_then(|r| r.rule_ids(&filter)) {
                for rule_id in ids {
                    tx.disabled.remove(rule_id);
                }
                // A static rule covers the filter, no dynamic copy needed.
                if tx.dynamic.release(&filter, &owner) != Released::NotOwned {
                    log::debug!("{}: static rule replaces dynamic copy of {}", id, filter);
                }
            } else {
                let owned = tx.dynamic.get(&filter).is_some_and(|r| r.is_owned_by(&owner));
                if !owned {
                    match tx.dynamic.acquire(&filter, owner.clone(), |f| self.compiler.compile(f)) {
                        Ok(Acquired::Shared) => {
                            log::debug!("{}: sharing existing record for {}", id, filter);
                        }
                        Ok(Acquired::Allocated(ids)) => {
                            log::debug!("{}: staged {} new rule(s) for {}", id, ids.len(), filter);
                        }
                        Err(error) => {
                            log::warn!("{}: skipping filter {}: {}", id, filter, error);
                            tx.skipped.push(SkippedFilter {
                                text: raw.clone(),
                                error,
                            });
                            continue;
                        }
                    }
                }
            }

            tx.active.insert(filter.clone());
            tx.added.push(filter);
        }

        tx
    }

    /// Apply a downloaded diff.
    pub fn apply(&self, rules: &mut RuleState, subscription: &mut Subscription, diff: &Diff) -> Applied {
        let tx = self.stage(rules, subscription, diff);
        self.commit(rules, subscription, tx, diff.version.clone(), CommitMode::Download)
    }

    /// Reinstall `filters` as the subscription's filter set without a download.
    ///
    /// The subscription must not hold any rules when this is called: its
    /// installed state is assumed to be the static baseline. A rejected replay
    /// leaves the subscription untouched and emits no events.
    pub fn replay(
        &self,
        rules: &mut RuleState,
        subscription: &mut Subscription,
        filters: &BTreeSet<FilterText>,
    ) -> Applied {
        let baseline = self.statics.baseline(subscription.id());
        let undo_subscription = subscription.clone();

        let diff = Diff::new(
            filters.difference(&baseline).map(FilterText::to_string),
            baseline.difference(filters).map(FilterText::to_string),
        );
        subscription.replace_active_filters(baseline);

        let tx = self.stage(rules, subscription, &diff);
        let mut applied = self.commit(rules, subscription, tx, None, CommitMode::Replay);
        if !applied.outcome.is_applied() {
            // Nothing was installed; the set stays saved for a retry.
            *subscription = undo_subscription.clone();
            applied.outbox = Outbox::new();
        }
        applied.undo.subscription = undo_subscription;
        applied
    }

    fn commit(
        &self,
        rules: &mut RuleState,
        subscription: &mut Subscription,
        tx: SyncTransaction,
        version: Option<String>,
        mode: CommitMode,
    ) -> Applied {
        let mut outbox = Outbox::new();
        let mut undo = Undo {
            subscription: subscription.clone(),
            rules: None,
        };

        let projected = tx.projected_usage(rules);
        if let Err(exceeded) = rules.try_reserve(projected) {
            log::warn!("{}: diff rejected: {}", subscription.id(), exceeded);
            subscription.set_download_status(DownloadStatus::DiffTooManyFilters);
            outbox.changed(subscription, SubscriptionProperty::DownloadStatus);
            return Applied {
                outcome: ApplyOutcome::Rejected(exceeded),
                outbox,
                undo,
            };
        }

        let SyncTransaction {
            subscription: id,
            dynamic,
            disabled,
            active,
            added,
            removed,
            skipped,
        } = tx;
        if !added.is_empty() || !removed.is_empty() {
            let previous_dynamic = rules.swap_dynamic(dynamic);
            let previous_disabled = rules.swap_disabled(&id, disabled);
            undo.rules = Some((previous_dynamic, previous_disabled));
            subscription.replace_active_filters(active);
        }

        let mut status_changed = false;
        let mut version_changed = false;
        if mode == CommitMode::Download {
            status_changed = subscription.set_download_status(DownloadStatus::Ok);
            if version.is_some() {
                version_changed = subscription.set_last_applied_version(version);
            }
        }

        log::info!(
            "{}: committed +{} -{} ({} skipped), {} dynamic / {} disabled rules in use",
            id,
            added.len(),
            removed.len(),
            skipped.len(),
            rules.usage().dynamic_rules,
            rules.usage().disabled_static_rules,
        );

        outbox.filters_added(subscription, added.clone());
        outbox.filters_removed(subscription, removed.clone());
        if status_changed {
            outbox.changed(subscription, SubscriptionProperty::DownloadStatus);
        }
        if version_changed {
            outbox.changed(subscription, SubscriptionProperty::LastVersion);
        }

        Applied {
            outcome: ApplyOutcome::Applied(DiffReport {
                added,
                removed,
                skipped,
                usage: rules.usage(),
            }),
            outbox,
            undo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SyncEvent;
    use crate::quota::QuotaLimits;
    use crate::static_rules::StaticRuleset;
    use crate::subscription::SubscriptionOptions;

    /// Compiles every filter to one rule, except filters starting with "bad".
    struct TestCompiler;

    impl RuleCompiler for TestCompiler {
        fn compile(&self, filter: &FilterText) -> Result<usize, FilterError> {
            if filter.as_str().starts_with("bad") {
                return Err(FilterError::Uncompilable {
                    filter: filter.to_string(),
                    reason: "test".to_string(),
                });
            }
            Ok(1)
        }
    }

    const URL_A: &str = "https://lists.example/a.txt";
    const URL_B: &str = "https://lists.example/b.txt";

    fn text(s: &str) -> FilterText {
        FilterText::new(s).unwrap()
    }

    /// Subscription A ships S1 and S2 as static rules 1 and 2.
    fn statics() -> StaticRuleIndex {
        let mut ruleset = StaticRuleset::new();
        ruleset.insert(text("S1"), vec![RuleId(1)]);
        ruleset.insert(text("S2"), vec![RuleId(2)]);
        let mut index = StaticRuleIndex::new();
        index.insert(SubscriptionId::new(URL_A), ruleset);
        index
    }

    fn subscription(statics: &StaticRuleIndex, url: &str) -> Subscription {
        let id = SubscriptionId::new(url);
        let options = SubscriptionOptions {
            diff_endpoint: Some(format!("{url}.diff")),
            enabled: true,
        };
        Subscription::new(id.clone(), options, statics.baseline(&id))
    }

    fn applied_report(applied: Applied) -> DiffReport {
        match applied.outcome {
            ApplyOutcome::Applied(report) => report,
            ApplyOutcome::Rejected(err) => panic!("unexpected rejection: {err}"),
        }
    }

    #[test]
    fn adds_dynamic_rules_and_disables_static_rules() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_A);

        let report = applied_report(applier.apply(
            &mut rules,
            &mut sub,
            &Diff::new(["F1", "F2", "F3", "F4"], ["S1", "S2"]),
        ));

        assert_eq!(report.usage.dynamic_rules, 4);
        assert_eq!(report.usage.disabled_static_rules, 2);
        assert_eq!(rules.counted_usage(), rules.usage());
        assert_eq!(sub.download_status(), Some(&DownloadStatus::Ok));
        assert_eq!(sub.active_filters().len(), 4);
        assert!(!sub.active_filters().contains(&text("S1")));
    }

    #[test]
    fn reapplying_a_diff_changes_nothing() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_A);
        let diff = Diff::new(["F1", "F2"], ["S1"]);

        let _ = applier.apply(&mut rules, &mut sub, &diff);
        let rules_once = rules.clone();
        let filters_once = sub.active_filters().clone();

        let applied = applier.apply(&mut rules, &mut sub, &diff);
        let report = applied_report(applied);
        assert!(report.added.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(rules, rules_once);
        assert_eq!(sub.active_filters(), &filters_once);
    }

    #[test]
    fn quota_rejection_leaves_stores_untouched() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(4, 5));
        let mut sub = subscription(&statics, URL_A);
        let _ = applier.apply(&mut rules, &mut sub, &Diff::new(["F1", "F2", "F3", "F4"], ["S1"]));

        let rules_before = rules.clone();
        let filters_before = sub.active_filters().clone();

        let applied = applier.apply(&mut rules, &mut sub, &Diff::new(["F1", "F5"], ["S2"]));
        assert!(matches!(applied.outcome, ApplyOutcome::Rejected(_)));
        assert_eq!(rules, rules_before);
        assert_eq!(sub.active_filters(), &filters_before);
        assert_eq!(sub.download_status(), Some(&DownloadStatus::DiffTooManyFilters));
        assert!(matches!(
            applied.outbox.iter().next(),
            Some(SyncEvent::SubscriptionChanged {
                property: SubscriptionProperty::DownloadStatus,
                ..
            })
        ));
    }

    #[test]
    fn invalid_filters_are_skipped() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_B);

        let report = applied_report(applier.apply(
            &mut rules,
            &mut sub,
            &Diff::new(["F1", "bad-filter", "   ", "F2"], Vec::<String>::new()),
        ));

        assert_eq!(report.added, vec![text("F1"), text("F2")]);
        assert_eq!(report.skipped.len(), 2);
        assert!(!sub.active_filters().contains(&text("bad-filter")));
        assert_eq!(rules.usage().dynamic_rules, 2);
    }

    #[test]
    fn shared_filters_survive_removal_by_one_owner() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut a = subscription(&statics, URL_A);
        let mut b = subscription(&statics, URL_B);

        let _ = applier.apply(&mut rules, &mut a, &Diff::new(["F1"], Vec::<String>::new()));
        let _ = applier.apply(&mut rules, &mut b, &Diff::new(["F1"], Vec::<String>::new()));
        assert_eq!(rules.usage().dynamic_rules, 1);
        let ids = rules.dynamic().get(&text("F1")).unwrap().rule_ids().to_vec();

        let _ = applier.apply(&mut rules, &mut a, &Diff::new(Vec::<String>::new(), ["F1"]));
        let record = rules.dynamic().get(&text("F1")).unwrap();
        assert_eq!(record.rule_ids(), ids.as_slice());
        assert!(record.is_owned_by(&Owner::Subscription(SubscriptionId::new(URL_B))));
        assert!(b.active_filters().contains(&text("F1")));
        assert!(!a.active_filters().contains(&text("F1")));
    }

    #[test]
    fn readding_a_static_filter_enables_it_again() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_A);

        let _ = applier.apply(&mut rules, &mut sub, &Diff::new(Vec::<String>::new(), ["S1"]));
        assert!(rules.disabled().is_disabled(sub.id(), RuleId(1)));

        let report = applied_report(applier.apply(&mut rules, &mut sub, &Diff::new(["S1"], Vec::<String>::new())));
        assert_eq!(report.added, vec![text("S1")]);
        assert!(!rules.disabled().is_disabled(sub.id(), RuleId(1)));
        assert_eq!(rules.usage().dynamic_rules, 0);
    }

    #[test]
    fn filter_in_both_lists_ends_up_removed() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_A);

        let _ = applier.apply(&mut rules, &mut sub, &Diff::new(["F1", "S1"], ["F1", "S1"]));
        assert!(!sub.active_filters().contains(&text("F1")));
        assert!(!sub.active_filters().contains(&text("S1")));
        assert_eq!(rules.usage().dynamic_rules, 0);
        assert_eq!(rules.usage().disabled_static_rules, 1);
    }

    #[test]
    fn undo_restores_the_previous_commit() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_A);
        let rules_before = rules.clone();
        let sub_before = sub.clone();

        let applied = applier.apply(
            &mut rules,
            &mut sub,
            &Diff::new(["F1"], ["S2"]).with_version("202401010000"),
        );
        assert!(applied.outcome.is_applied());
        assert_eq!(sub.last_applied_version(), Some("202401010000"));

        applied.undo.restore(&mut rules, &mut sub);
        assert_eq!(rules, rules_before);
        assert_eq!(sub, sub_before);
    }

    #[test]
    fn replay_reinstalls_a_filter_set() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_A);
        let _ = applier.apply(&mut rules, &mut sub, &Diff::new(["F1", "F2"], ["S1"]));
        let committed = sub.active_filters().clone();
        let usage = rules.usage();

        rules.release_subscription(sub.id());
        assert_eq!(rules.usage(), QuotaUsage::default());

        let applied = applier.replay(&mut rules, &mut sub, &committed);
        assert!(applied.outcome.is_applied());
        assert_eq!(rules.usage(), usage);
        assert_eq!(sub.active_filters(), &committed);
    }

    #[test]
    fn rejected_replay_keeps_the_saved_set() {
        let statics = statics();
        let applier = DiffApplier::new(&statics, &TestCompiler);
        let mut rules = RuleState::new(QuotaLimits::new(5, 5));
        let mut sub = subscription(&statics, URL_A);
        let _ = applier.apply(&mut rules, &mut sub, &Diff::new(["F1", "F2", "F3"], Vec::<String>::new()));
        let committed = sub.active_filters().clone();

        rules.release_subscription(sub.id());
        rules.set_limits(QuotaLimits::new(2, 5));
        let before = sub.clone();

        let applied = applier.replay(&mut rules, &mut sub, &committed);
        assert!(!applied.outcome.is_applied());
        assert!(applied.outbox.is_empty());
        assert_eq!(sub, before);
        assert_eq!(sub.active_filters(), &committed);
        assert_eq!(rules.usage(), QuotaUsage::default());

        // Fits again once the quota grows.
        rules.set_limits(QuotaLimits::new(5, 5));
        let applied = applier.replay(&mut rules, &mut sub, &committed);
        assert!(applied.outcome.is_applied());
        assert_eq!(rules.usage().dynamic_rules, 3);
    }
}
