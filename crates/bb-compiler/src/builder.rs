//! Build-time static ruleset construction.
//!
//! Each baseline filter list becomes one static ruleset. Rule ids are assigned
//! in list order starting at 1 and are stable for a given list text, which is
//! what lets persisted disable sets refer to them across restarts.

use bb_core::{FilterText, RuleId, StaticRuleIndex, StaticRuleset, SubscriptionId};

use crate::parser::parse_filter_list;
use crate::rule::{CompiledRule, RuleAction};

const FIRST_STATIC_RULE_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildStats {
    pub lines: usize,
    pub filters: usize,
    pub rules: usize,
    pub deduped: usize,
    /// Exception rules among `rules`
    pub allow_rules: usize,
    /// Redirect rules among `rules`
    pub redirect_rules: usize,
    pub important_rules: usize,
}

impl BuildStats {
    pub fn merge(&mut self, other: &BuildStats) {
        self.lines += other.lines;
        self.filters += other.filters;
        self.rules += other.rules;
        self.deduped += other.deduped;
        self.allow_rules += other.allow_rules;
        self.redirect_rules += other.redirect_rules;
        self.important_rules += other.important_rules;
    }

    fn count(&mut self, rule: &CompiledRule) {
        self.rules += 1;
        match rule.action {
            RuleAction::Allow => self.allow_rules += 1,
            RuleAction::Redirect => self.redirect_rules += 1,
            RuleAction::Block => {}
        }
        if rule.important {
            self.important_rules += 1;
        }
    }
}

pub fn build_static_ruleset(text: &str) -> (StaticRuleset, BuildStats) {
    let mut ruleset = StaticRuleset::new();
    let mut stats = BuildStats {
        lines: text.lines().count(),
        ..BuildStats::default()
    };
    let mut next_id = FIRST_STATIC_RULE_ID;

    for (line, rules) in parse_filter_list(text) {
        let Ok(filter) = FilterText::new(&line) else {
            continue;
        };
        if ruleset.contains(&filter) {
            stats.deduped += 1;
            continue;
        }

        let ids: Vec<RuleId> = rules
            .iter()
            .map(|rule| {
                stats.count(rule);
                let id = RuleId(next_id);
                next_id += 1;
                id
            })
            .collect();
        stats.filters += 1;
        ruleset.insert(filter, ids);
    }

    (ruleset, stats)
}

/// Build the static rule index for `(subscription url, list text)` pairs.
pub fn build_static_index<'a, I>(lists: I) -> (StaticRuleIndex, BuildStats)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut index = StaticRuleIndex::new();
    let mut total = BuildStats::default();

    for (url, text) in lists {
        let (ruleset, stats) = build_static_ruleset(text);
        log::debug!(
            "Static ruleset {}: {} lines, {} filters, {} rules",
            url,
            stats.lines,
            stats.filters,
            stats.rules
        );
        total.merge(&stats);
        index.insert(SubscriptionId::new(url), ruleset);
    }

    (index, total)
}
