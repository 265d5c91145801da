//! Explicit approval request.
//!
//! Write-class tools interrupt on their own; this tool lets the model ask
//! for confirmation of a whole course of action up front. It never
//! touches any subsystem: the first call suspends the thread, and the
//! approved re-invocation simply acknowledges.

use crate::error::OlavError;
use crate::session::tool_fingerprint;
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct RequestApprovalTool;

#[async_trait]
impl Tool for RequestApprovalTool {
    fn name(&self) -> &str {
        "request_approval"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Ask the operator to approve a described action before proceeding. \
                          Returns 'approved' only after a human confirms."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "description": "What is about to happen, in one sentence."
                    },
                    "reason": {"type": "string"}
                },
                "required": ["action"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let action = required_str(&args, "action")?;
        let fingerprint = tool_fingerprint(self.name(), &args);
        if ctx.approval.as_deref() == Some(fingerprint.as_str()) {
            return Ok(json!({"approved": true, "action": action}).to_string());
        }
        Err(OlavError::NeedsApproval {
            tool: format!("request_approval: {action}"),
            fingerprint,
        }
        .into())
    }
}
