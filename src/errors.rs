//! Error types for the expiry sync job.
//!
//! Two layers exist:
//! - [`SyncError`] is returned by fallible operations (loading config, reading a
//!   tier document, talking to the cache).
//! - [`Failure`] is the structured, non-fatal record of a pass that went wrong.
//!   Passes never propagate errors to the driver; they convert them into a
//!   `Failure` so the batch always completes and callers can still inspect what
//!   broke.

use std::fmt;

use thiserror::Error;

/// Errors produced while syncing expiration data.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid tier document: {0}")]
    InvalidDocument(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        SyncError::Cache(err.to_string())
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Reasons a sale timestamp could not be turned into an expiration instant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("soldAt is missing")]
    Missing,

    #[error("soldAt is the not-set sentinel")]
    Sentinel,

    #[error("soldAt '{value}' is malformed: {reason}")]
    Malformed { value: String, reason: String },

    #[error("a {retention_days} day window overflows the calendar")]
    OutOfRange { retention_days: u32 },
}

/// Category of a pass failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Tier document missing, unreadable, unwritable or not valid JSON.
    Io,
    /// Tier document parsed but has the wrong shape.
    Parse,
    /// Cache server unreachable or a cache command failed.
    Cache,
    /// The pass did not finish in time.
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Io => "io",
            FailureKind::Parse => "parse",
            FailureKind::Cache => "cache",
            FailureKind::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// A non-fatal failure of one pass (one file, one tier's cache mirror, or the
/// client-key cross-reference).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// What the pass was working on, e.g. `medium.json` or `medium_products:*`.
    pub scope: String,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope: scope.into(),
            message: message.into(),
        }
    }

    /// Classify a [`SyncError`] raised while working on `scope`.
    pub fn from_error(scope: impl Into<String>, err: &SyncError) -> Self {
        let kind = match err {
            SyncError::Io(_) | SyncError::Json(_) => FailureKind::Io,
            SyncError::InvalidDocument(_) => FailureKind::Parse,
            SyncError::Cache(_) | SyncError::ConfigError(_) | SyncError::Scheduler(_) => {
                FailureKind::Cache
            }
        };
        Self::new(kind, scope, err.to_string())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.scope, self.message)
    }
}
