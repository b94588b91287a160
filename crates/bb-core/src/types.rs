//! Core type definitions for BetterBlocker rule sync
//!
//! Identifiers shared by the dynamic filter table, the static disable set and
//! the subscription store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

// =============================================================================
// Filter Text
// =============================================================================

/// Normalized text of a single filter line.
///
/// Two filters are the same filter iff their normalized text is byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilterText(String);

impl FilterText {
    /// Normalize raw filter text.
    ///
    /// Surrounding whitespace is trimmed. Empty and multi-line input is rejected.
    pub fn new(raw: &str) -> Result<Self, FilterError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FilterError::Empty);
        }
        if trimmed.contains(['\n', '\r']) {
            return Err(FilterError::MultiLine(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FilterText {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<FilterText> for String {
    fn from(value: FilterText) -> Self {
        value.0
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Subscription identity. Subscriptions are keyed by their list URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Numeric rule identifier.
///
/// Dynamic rule ids are unique across the whole dynamic table. Static rule ids
/// are unique within the ruleset of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Ownership
// =============================================================================

const USER_OWNER: &str = "user";
const SUBSCRIPTION_OWNER_PREFIX: &str = "subscription:";

/// Holder of a reference on a dynamic filter record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Owner {
    /// Filter added directly by the user
    User,
    /// Filter added by a subscription diff
    Subscription(SubscriptionId),
}

impl Owner {
    pub fn subscription(&self) -> Option<&SubscriptionId> {
        match self {
            Owner::User => None,
            Owner::Subscription(id) => Some(id),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::User => f.write_str(USER_OWNER),
            Owner::Subscription(id) => write!(f, "{SUBSCRIPTION_OWNER_PREFIX}{id}"),
        }
    }
}

impl From<Owner> for String {
    fn from(value: Owner) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Owner {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == USER_OWNER {
            return Ok(Owner::User);
        }
        match value.strip_prefix(SUBSCRIPTION_OWNER_PREFIX) {
            Some(id) if !id.is_empty() => Ok(Owner::Subscription(SubscriptionId::new(id))),
            _ => Err(format!("invalid owner: {value}")),
        }
    }
}

// =============================================================================
// Download Status
// =============================================================================

/// Outcome of the most recent synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DownloadStatus {
    Ok,
    ConnectionError,
    /// The diff did not fit into the rule quota and was rejected
    DiffTooManyFilters,
    /// Status reported by the transport layer
    Transport(String),
}

impl DownloadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "ok",
            Self::ConnectionError => "connection_error",
            Self::DiffTooManyFilters => "diff_too_many_filters",
            Self::Transport(status) => status,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DownloadStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ok" => Self::Ok,
            "connection_error" => Self::ConnectionError,
            "diff_too_many_filters" => Self::DiffTooManyFilters,
            _ => Self::Transport(value),
        }
    }
}

impl From<DownloadStatus> for String {
    fn from(value: DownloadStatus) -> Self {
        value.as_str().to_string()
    }
}
