//! Build-time static rulesets
//!
//! Each subscription shipped with the extension has a ruleset compiled at
//! build time. Its rules cannot be removed at runtime, only disabled by id.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{FilterText, RuleId, SubscriptionId};

/// One static rule compiled from a filter of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRuleRef {
    pub subscription: SubscriptionId,
    pub filter: FilterText,
    pub rule_id: RuleId,
}

/// Static rules of one subscription, keyed by filter text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticRuleset {
    filters: BTreeMap<FilterText, Vec<RuleId>>,
}

impl StaticRuleset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filter: FilterText, rule_ids: Vec<RuleId>) {
        self.filters.insert(filter, rule_ids);
    }

    pub fn rule_ids(&self, filter: &FilterText) -> Option<&[RuleId]> {
        self.filters.get(filter).map(Vec::as_slice)
    }

    pub fn contains(&self, filter: &FilterText) -> bool {
        self.filters.contains_key(filter)
    }

    /// Baseline filter set, active when no diff has been applied.
    pub fn baseline(&self) -> BTreeSet<FilterText> {
        self.filters.keys().cloned().collect()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn rule_count(&self) -> usize {
        self.filters.values().map(Vec::len).sum()
    }
}

/// All static rulesets, keyed by subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticRuleIndex {
    rulesets: BTreeMap<SubscriptionId, StaticRuleset>,
}

impl StaticRuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subscription: SubscriptionId, ruleset: StaticRuleset) {
        self.rulesets.insert(subscription, ruleset);
    }

    pub fn ruleset(&self, subscription: &SubscriptionId) -> Option<&StaticRuleset> {
        self.rulesets.get(subscription)
    }

    pub fn rulesets(&self) -> impl Iterator<Item = (&SubscriptionId, &StaticRuleset)> + '_ {
        self.rulesets.iter()
    }

    /// Static rules `subscription` compiled `filter` into, if any.
    pub fn lookup(&self, subscription: &SubscriptionId, filter: &FilterText) -> Vec<StaticRuleRef> {
        self.ruleset(subscription)
            .and_then(|ruleset| ruleset.rule_ids(filter))
            .map(|ids| {
                ids.iter()
                    .map(|rule_id| StaticRuleRef {
                        subscription: subscription.clone(),
                        filter: filter.clone(),
                        rule_id: *rule_id,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Baseline filter set of `subscription`; empty without a static ruleset.
    pub fn baseline(&self, subscription: &SubscriptionId) -> BTreeSet<FilterText> {
        self.ruleset(subscription)
            .map(StaticRuleset::baseline)
            .unwrap_or_default()
    }
}
