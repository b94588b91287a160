//! BetterBlocker Filter Compiler
//!
//! Compiles ABP/uBO network filters into rules: static rulesets for the
//! baseline lists at build time, dynamic rule slots for filters added later.

pub mod builder;
pub mod compiler;
pub mod parser;
pub mod rule;

pub use builder::{build_static_index, build_static_ruleset, BuildStats};
pub use compiler::FilterCompiler;
pub use parser::{parse_filter, parse_filter_list, ParseError};
pub use rule::{CompiledRule, RuleAction};
