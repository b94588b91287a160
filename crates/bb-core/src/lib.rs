//! BetterBlocker Core Library
//!
//! This crate keeps the rules installed for diff-updated subscriptions
//! consistent with the filter text those subscriptions report.
//!
//! # Architecture
//!
//! The blocking substrate offers two kinds of rules: a large set of static
//! rules compiled at build time, which can only be disabled, and a small,
//! quota-limited pool of dynamic rule slots. A subscription starts from its
//! static baseline. Each diff disables static rules for removed filters and
//! allocates dynamic slots for added ones. Slots are shared between every
//! subscription (and the user) that holds the same filter text.
//!
//! Every change runs as a transaction over [`RuleState`]: staged on a working
//! copy, checked against the quota, then committed whole or not at all.
//!
//! # Modules
//!
//! - `types`: Identifiers, filter text, download status and rule classification
//! - `quota`: Quota limits and usage accounting
//! - `dynamic`: Filter text to dynamic rule slot table with shared ownership
//! - `static_rules`: Build-time static rulesets
//! - `disabled`: Static rules disabled per subscription
//! - `subscription`: Subscription metadata and store
//! - `state`: The combined rule state and user filters
//! - `diff`: Diff staging, commit and rollback
//! - `recovery`: Startup reset of diff-derived state
//! - `event`: Domain events and the outbox

pub mod diff;
pub mod disabled;
pub mod dynamic;
pub mod error;
pub mod event;
pub mod quota;
pub mod recovery;
pub mod state;
pub mod static_rules;
pub mod subscription;
pub mod types;

// Re-export commonly used types
pub use diff::{ApplyOutcome, Applied, Diff, DiffApplier, DiffReport, RuleCompiler, SkippedFilter, SyncTransaction, Undo};
pub use disabled::StaticDisableSet;
pub use dynamic::{Acquired, DynamicFilterRecord, DynamicFilterTable, Released};
pub use error::{FilterError, QuotaExceeded, TransportError, UserFilterError};
pub use event::{Outbox, SubscriptionProperty, SyncEvent};
pub use quota::{QuotaDelta, QuotaLimits, QuotaManager, QuotaProvider, QuotaUsage};
pub use recovery::{recover_after_restart, RecoveryReport};
pub use state::{ReleaseReport, RuleState};
pub use static_rules::{StaticRuleIndex, StaticRuleRef, StaticRuleset};
pub use subscription::{Subscription, SubscriptionInfo, SubscriptionOptions, SubscriptionStore};
pub use types::{DownloadStatus, FilterText, Owner, RuleId, SubscriptionId};
