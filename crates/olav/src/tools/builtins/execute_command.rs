//! Whitelist-gated CLI command execution.

use crate::fleet::{ExecuteOptions, ExecutionResult, FleetEngine, Operation};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, required_str, optional_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub struct ExecuteCommandTool {
    engine: Arc<FleetEngine>,
}

impl ExecuteCommandTool {
    pub fn new(engine: Arc<FleetEngine>) -> Self {
        Self { engine }
    }
}

pub(crate) fn render_result(result: &ExecutionResult) -> String {
    let data = match &result.parsed {
        Some(rows) => json!(rows),
        None => json!(result.raw),
    };
    json!({
        "device": result.device,
        "pattern_matched": result.pattern_matched,
        "structured": result.structured,
        "tokens_raw": result.tokens_raw,
        "tokens_parsed": result.tokens_parsed,
        "tokens_saved": result.tokens_saved,
        "duration_ms": result.duration.as_millis() as u64,
        "data": data,
    })
    .to_string()
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Run one whitelisted CLI command on one device. Write-class commands \
                          suspend the thread for human approval before anything touches the \
                          device."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "device": {
                        "type": "string",
                        "description": "Device name from the inventory."
                    },
                    "command": {
                        "type": "string",
                        "description": "The exact command to run; it must match a whitelisted pattern."
                    },
                    "timeout_secs": {
                        "type": "integer",
                        "description": "Per-command timeout (default 30, capped at 300)."
                    },
                    "parse": {
                        "type": "boolean",
                        "description": "Parse output through the platform template when one exists.",
                        "default": true
                    },
                    "platform": {
                        "type": "string",
                        "description": "Override the inventory platform tag."
                    }
                },
                "required": ["device", "command"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let device = required_str(&args, "device")?;
        let command = required_str(&args, "command")?;
        let opts = ExecuteOptions {
            timeout: args
                .get("timeout_secs")
                .and_then(Value::as_u64)
                .map(Duration::from_secs),
            parse: args.get("parse").and_then(Value::as_bool).unwrap_or(true),
            platform_override: optional_str(&args, "platform").map(str::to_string),
            approval: ctx.approval.clone(),
            thread_id: ctx.thread_id.clone(),
        };
        let result = self
            .engine
            .execute(device, Operation::command(command), opts)
            .await?;
        Ok(render_result(&result))
    }
}
