//! Platform rule quota accounting
//!
//! The blocking substrate caps how many dynamic rules may be installed and how
//! many static rules may be disabled at once. Both caps are shared by every
//! subscription and by user filters, so all pending changes go through one
//! `QuotaManager` check-then-commit.

use serde::{Deserialize, Serialize};

use crate::error::QuotaExceeded;

const DEFAULT_DYNAMIC_MAX: usize = 5000;
const DEFAULT_DISABLED_MAX: usize = 5000;

/// Source of the current platform maxima.
pub trait QuotaProvider {
    fn dynamic_max(&self) -> usize;
    fn disabled_max(&self) -> usize;

    fn limits(&self) -> QuotaLimits {
        QuotaLimits {
            dynamic_max: self.dynamic_max(),
            disabled_max: self.disabled_max(),
        }
    }
}

/// Fixed quota maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    pub dynamic_max: usize,
    pub disabled_max: usize,
}

impl QuotaLimits {
    pub const fn new(dynamic_max: usize, disabled_max: usize) -> Self {
        Self { dynamic_max, disabled_max }
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self::new(DEFAULT_DYNAMIC_MAX, DEFAULT_DISABLED_MAX)
    }
}

impl QuotaProvider for QuotaLimits {
    fn dynamic_max(&self) -> usize {
        self.dynamic_max
    }

    fn disabled_max(&self) -> usize {
        self.disabled_max
    }
}

/// Consumed quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub dynamic_rules: usize,
    pub disabled_static_rules: usize,
}

/// Signed change to quota usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaDelta {
    pub dynamic_rules: isize,
    pub disabled_static_rules: isize,
}

impl QuotaDelta {
    /// Delta that moves `from` to `to`.
    pub fn between(from: QuotaUsage, to: QuotaUsage) -> Self {
        Self {
            dynamic_rules: to.dynamic_rules as isize - from.dynamic_rules as isize,
            disabled_static_rules: to.disabled_static_rules as isize
                - from.disabled_static_rules as isize,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.dynamic_rules == 0 && self.disabled_static_rules == 0
    }
}

/// Tracks quota usage against the current limits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuotaManager {
    limits: QuotaLimits,
    usage: QuotaUsage,
}

impl QuotaManager {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            usage: QuotaUsage::default(),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: QuotaLimits) {
        self.limits = limits;
    }

    pub fn usage(&self) -> QuotaUsage {
        self.usage
    }

    /// Usage after applying `delta`.
    pub fn project(&self, delta: QuotaDelta) -> QuotaUsage {
        QuotaUsage {
            dynamic_rules: apply_signed(self.usage.dynamic_rules, delta.dynamic_rules),
            disabled_static_rules: apply_signed(
                self.usage.disabled_static_rules,
                delta.disabled_static_rules,
            ),
        }
    }

    /// Whether `delta` can be committed.
    ///
    /// A dimension that does not grow always fits, so shrinking limits never
    /// block removals.
    pub fn would_fit(&self, delta: QuotaDelta) -> bool {
        let projected = self.project(delta);
        let dynamic_ok =
            delta.dynamic_rules <= 0 || projected.dynamic_rules <= self.limits.dynamic_max;
        let disabled_ok = delta.disabled_static_rules <= 0
            || projected.disabled_static_rules <= self.limits.disabled_max;
        dynamic_ok && disabled_ok
    }

    /// Record `delta` as consumed. Callers check `would_fit` first.
    pub fn commit(&mut self, delta: QuotaDelta) {
        self.usage = self.project(delta);
    }

    /// Atomic check-then-commit.
    pub fn try_commit(&mut self, delta: QuotaDelta) -> Result<QuotaUsage, QuotaExceeded> {
        if !self.would_fit(delta) {
            return Err(QuotaExceeded {
                projected: self.project(delta),
                dynamic_max: self.limits.dynamic_max,
                disabled_max: self.limits.disabled_max,
            });
        }
        self.commit(delta);
        Ok(self.usage)
    }

    /// Overwrite usage with a recount of the stores.
    pub(crate) fn reset_usage(&mut self, usage: QuotaUsage) {
        self.usage = usage;
    }
}

fn apply_signed(value: usize, delta: isize) -> usize {
    if delta >= 0 {
        value.saturating_add(delta as usize)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}
