//! Uniform error surface for every core operation.
//!
//! Every failure carries a stable machine-readable [`ErrorKind`] and a
//! human-readable message; UI collaborators map kinds to presentation.
//! `NeedsApproval` is the one variant that is a protocol state rather than
//! a failure: the session layer converts it into a thread interrupt.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OlavError>;

/// Stable machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotPermitted,
    NeedsApproval,
    NotFound,
    Auth,
    Transport,
    Timeout,
    ParseFailed,
    EmptyScope,
    Busy,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotPermitted => "not_permitted",
            ErrorKind::NeedsApproval => "needs_approval",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Auth => "auth",
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ParseFailed => "parse_failed",
            ErrorKind::EmptyScope => "empty_scope",
            ErrorKind::Busy => "busy",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Structured, serializable error type shared by all subsystems.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum OlavError {
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    #[error("approval required for {tool} (fingerprint {fingerprint})")]
    NeedsApproval { tool: String, fingerprint: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed on {device}: {reason}")]
    Auth { device: String, reason: String },

    #[error("transport failure on {device}: {reason}")]
    Transport { device: String, reason: String },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("template parse failed for {operation}: {reason}")]
    ParseFailed { operation: String, reason: String },

    #[error("selector matched no devices: {0}")]
    EmptyScope(String),

    #[error("thread {0} is busy")]
    Busy(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OlavError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OlavError::NotPermitted(_) => ErrorKind::NotPermitted,
            OlavError::NeedsApproval { .. } => ErrorKind::NeedsApproval,
            OlavError::NotFound(_) => ErrorKind::NotFound,
            OlavError::Auth { .. } => ErrorKind::Auth,
            OlavError::Transport { .. } => ErrorKind::Transport,
            OlavError::Timeout { .. } => ErrorKind::Timeout,
            OlavError::ParseFailed { .. } => ErrorKind::ParseFailed,
            OlavError::EmptyScope(_) => ErrorKind::EmptyScope,
            OlavError::Busy(_) => ErrorKind::Busy,
            OlavError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        OlavError::Internal(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        OlavError::NotFound(what.into())
    }
}

impl From<std::io::Error> for OlavError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => OlavError::NotFound(e.to_string()),
            _ => OlavError::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for OlavError {
    fn from(e: serde_json::Error) -> Self {
        OlavError::Internal(format!("json: {e}"))
    }
}

impl From<tokio::task::JoinError> for OlavError {
    fn from(e: tokio::task::JoinError) -> Self {
        OlavError::Internal(format!("task join failed: {e}"))
    }
}
