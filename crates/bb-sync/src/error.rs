//! Error types for the sync engine.

use bb_core::{QuotaExceeded, SubscriptionId, UserFilterError};
use thiserror::Error;

/// Key-value storage failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("Subscription already exists: {0}")]
    DuplicateSubscription(SubscriptionId),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Serialization error for {key}: {message}")]
    Serialization { key: &'static str, message: String },

    #[error(transparent)]
    UserFilter(#[from] UserFilterError),

    /// A saved filter set could not be reinstalled; nothing changed
    #[error("Cannot reinstall filters: {0}")]
    Quota(#[from] QuotaExceeded),
}

impl From<bb_core::FilterError> for SyncError {
    fn from(err: bb_core::FilterError) -> Self {
        SyncError::UserFilter(UserFilterError::Invalid(err))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
