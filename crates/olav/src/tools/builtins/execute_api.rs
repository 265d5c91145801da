//! Whitelist-gated API calls against systems of record.

use crate::fleet::{ExecuteOptions, FleetEngine, Operation};
use crate::tools::builtins::execute_command::render_result;
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub struct ExecuteApiTool {
    engine: Arc<FleetEngine>,
}

impl ExecuteApiTool {
    pub fn new(engine: Arc<FleetEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ExecuteApiTool {
    fn name(&self) -> &str {
        "execute_api"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Call one whitelisted API operation on an inventory target (NetBox and \
                          the like). Operations annotated as writes require human approval."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "target": {
                        "type": "string",
                        "description": "Inventory name of the API system."
                    },
                    "method": {"type": "string", "description": "HTTP verb."},
                    "path": {"type": "string", "description": "Request path, e.g. /dcim/devices/42/."},
                    "body": {"type": "object", "description": "Optional JSON body."},
                    "timeout_secs": {"type": "integer"}
                },
                "required": ["target", "method", "path"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let target = required_str(&args, "target")?;
        let method = required_str(&args, "method")?;
        let path = required_str(&args, "path")?;
        let op = Operation::Api {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            body: args.get("body").cloned(),
        };
        let opts = ExecuteOptions {
            timeout: args
                .get("timeout_secs")
                .and_then(Value::as_u64)
                .map(Duration::from_secs),
            parse: false,
            platform_override: None,
            approval: ctx.approval.clone(),
            thread_id: ctx.thread_id.clone(),
        };
        let result = self.engine.execute(target, op, opts).await?;
        Ok(render_result(&result))
    }
}
