//! Write a document under the agent directory. Agent-context writes go
//! through the approval interrupt.

use crate::knowledge::{KnowledgeStore, WriteOptions};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct WriteFileTool {
    store: Arc<KnowledgeStore>,
}

impl WriteFileTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Write (or overwrite) a document under skills/, knowledge/, or \
                          imports/commands/. Requires human approval; the write happens only \
                          after the operator confirms."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the agent directory."},
                    "content": {"type": "string"},
                    "append": {
                        "type": "boolean",
                        "description": "Append instead of replacing.",
                        "default": false
                    }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let append = args.get("append").and_then(Value::as_bool).unwrap_or(false);

        let opts = WriteOptions {
            origin: ctx.origin,
            approval: ctx.approval.clone(),
        };
        if append {
            self.store.append(path, content, &opts).await?;
        } else {
            self.store.write(path, content, &opts).await?;
        }
        Ok(json!({"written": path, "bytes": content.len(), "append": append}).to_string())
    }
}
