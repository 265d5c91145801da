//! Tool trait and invocation context.
//!
//! Tools are registered from an explicit list at startup and invoked by
//! name; argument schemas are declared up front and inputs are checked at
//! the boundary of each `call`.

use crate::error::{ErrorKind, OlavError};
use crate::knowledge::WriteOrigin;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Core(#[from] OlavError),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::InvalidRequest(_) => ErrorKind::ParseFailed,
            ToolError::Core(e) => e.kind(),
        }
    }

    /// The approval fingerprint, when this error is the interrupt signal.
    pub fn approval_fingerprint(&self) -> Option<&str> {
        match self {
            ToolError::Core(OlavError::NeedsApproval { fingerprint, .. }) => {
                Some(fingerprint.as_str())
            }
            _ => None,
        }
    }
}

/// Declared shape of a tool, handed to the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Invocation context threaded through every call.
#[derive(Clone)]
pub struct ToolContext {
    /// Owning thread, when the call originates from a session.
    pub thread_id: Option<String>,
    /// Agent-context calls hit the write gates; administrative calls
    /// (operator CLI) bypass them.
    pub origin: WriteOrigin,
    /// Fingerprint approved for exactly one gated call.
    pub approval: Option<String>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn agent(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            origin: WriteOrigin::Agent,
            approval: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn administrative() -> Self {
        Self {
            thread_id: None,
            origin: WriteOrigin::Administrative,
            approval: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_approval(mut self, fingerprint: impl Into<String>) -> Self {
        self.approval = Some(fingerprint.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Execute with JSON arguments. The returned string goes back to the
    /// caller (LLM or operator) verbatim.
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext)
        -> Result<String, ToolError>;
}

/// Extract a required string argument.
pub(crate) fn required_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ToolError::InvalidRequest(format!("'{key}' is required")))
}

/// Extract an optional string argument.
pub(crate) fn optional_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_kinds_map_through() {
        let err = ToolError::InvalidRequest("missing device".into());
        assert_eq!(err.kind(), ErrorKind::ParseFailed);

        let err: ToolError = OlavError::NotPermitted("erase".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotPermitted);

        let err: ToolError = OlavError::NeedsApproval {
            tool: "write".into(),
            fingerprint: "abc".into(),
        }
        .into();
        assert_eq!(err.approval_fingerprint(), Some("abc"));
    }

    #[test]
    fn argument_helpers() {
        let args = json!({"device": "R1"});
        assert_eq!(required_str(&args, "device").unwrap(), "R1");
        assert!(required_str(&args, "command").is_err());
        assert_eq!(optional_str(&args, "platform"), None);
    }
}
