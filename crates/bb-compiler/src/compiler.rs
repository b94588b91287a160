//! Dynamic rule compilation for filters added by diffs or by the user.

use bb_core::{FilterError, FilterText, RuleCompiler};

use crate::parser::parse_filter;
use crate::rule::CompiledRule;

/// Compiles network filters into dynamic rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterCompiler;

impl FilterCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Full rules for `filter`.
    pub fn compile_rules(&self, filter: &FilterText) -> Result<Vec<CompiledRule>, FilterError> {
        parse_filter(filter.as_str()).map_err(|err| FilterError::Uncompilable {
            filter: filter.to_string(),
            reason: err.to_string(),
        })
    }
}

impl RuleCompiler for FilterCompiler {
    fn compile(&self, filter: &FilterText) -> Result<usize, FilterError> {
        self.compile_rules(filter).map(|rules| rules.len())
    }
}
