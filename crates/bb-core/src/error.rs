//! Error types for rule sync bookkeeping.

use crate::quota::QuotaUsage;
use crate::types::{DownloadStatus, FilterText};

/// A single filter could not be turned into rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("Empty filter text")]
    Empty,
    #[error("Filter text spans multiple lines: {0:?}")]
    MultiLine(String),
    #[error("Filter {filter} is not compilable: {reason}")]
    Uncompilable { filter: String, reason: String },
}

/// A pending change does not fit into the platform rule quota.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Quota exceeded: {} dynamic rules (max {}), {} disabled static rules (max {})",
    projected.dynamic_rules, dynamic_max, projected.disabled_static_rules, disabled_max
)]
pub struct QuotaExceeded {
    pub projected: QuotaUsage,
    pub dynamic_max: usize,
    pub disabled_max: usize,
}

/// Diff download failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),
    /// Failure with a transport-defined download status
    #[error("Transport error {status}: {message}")]
    Status { status: String, message: String },
}

impl TransportError {
    /// Status recorded on the subscription for this failure.
    pub fn download_status(&self) -> DownloadStatus {
        match self {
            TransportError::Connection(_) => DownloadStatus::ConnectionError,
            TransportError::Status { status, .. } => DownloadStatus::from(status.clone()),
        }
    }
}

/// Adding or removing a user filter failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserFilterError {
    #[error(transparent)]
    Invalid(#[from] FilterError),
    #[error(transparent)]
    Quota(#[from] QuotaExceeded),
    #[error("User filter not found: {0}")]
    NotFound(FilterText),
}
