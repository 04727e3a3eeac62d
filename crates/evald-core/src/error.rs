//! Error types for the evald service.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the evald service core.
///
/// Evaluation failures (syntax errors, denied commands, timeouts) are *not*
/// represented here — they are data, reported through
/// [`EvaluationResult::is_error`](crate::interpreter::EvaluationResult).
/// This enum covers the structural failures that callers branch on.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum EvaldError {
    /// More output was requested but no pagination cursor is live.
    #[error("No active page: run an evaluation first")]
    NoActivePage,

    /// Rollback target does not match any history entry.
    #[error("Unknown commit: '{commit_id}'")]
    UnknownCommit { commit_id: String },

    /// The versioned-storage collaborator is unreachable or corrupt.
    ///
    /// Fatal for the request; never folded into `is_error` and never
    /// silently retried by the core.
    #[error("Storage fault: {0}")]
    Storage(String),

    /// Configuration error (invalid page size, unparseable file, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session worker is gone or unresponsive.
    #[error("Session error: {0}")]
    Session(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvaldError {
    /// Creates an UnknownCommit error.
    pub fn unknown_commit(commit_id: impl Into<String>) -> Self {
        Self::UnknownCommit {
            commit_id: commit_id.into(),
        }
    }

    /// Creates a Storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a Session error.
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session(message.into())
    }

    /// Creates an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable code for this error.
    ///
    /// The HTTP façade exposes these so clients can branch without
    /// parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActivePage => "no_active_page",
            Self::UnknownCommit { .. } => "unknown_commit",
            Self::Storage(_) => "storage_fault",
            Self::Config(_) => "config_error",
            Self::Session(_) => "session_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Check if this is a Storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<std::io::Error> for EvaldError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(format!("{} (kind: {:?})", err, err.kind()))
    }
}

/// A type alias for `Result<T, EvaldError>`.
pub type Result<T> = std::result::Result<T, EvaldError>;
