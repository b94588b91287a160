//! BetterBlocker Sync Engine
//!
//! Runs subscription lifecycle and diff synchronization on top of the
//! bookkeeping in `bb-core`:
//!
//! - `engine`: [`SyncEngine`], the entry point for every operation
//! - `scheduler`: Per-subscription locks serializing syncs
//! - `fetcher`: The [`DiffFetcher`] download seam
//! - `persistence`: Key-value storage of subscriptions and rule stores
//! - `notifier`: Event broadcast to listeners
//! - `config`: Engine configuration

pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod notifier;
pub mod persistence;
pub mod scheduler;

pub use config::{ConfigError, EngineConfig};
pub use engine::{SyncEngine, SyncOutcome, SyncResult};
pub use error::{PersistenceError, Result, SyncError};
pub use fetcher::DiffFetcher;
pub use notifier::Notifier;
pub use persistence::{JsonFilePersistence, MemoryPersistence, Persistence};
pub use scheduler::{ScheduledGuard, SyncScheduler};
