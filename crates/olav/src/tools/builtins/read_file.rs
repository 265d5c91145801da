//! Read a document from the agent directory.

use crate::knowledge::KnowledgeStore;
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct ReadFileTool {
    store: Arc<KnowledgeStore>,
}

impl ReadFileTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Read a document under the agent directory (skills/, knowledge/, \
                          imports/, OLAV.md). Paths outside the permitted set are denied."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path relative to the agent directory."
                    }
                },
                "required": ["path"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        Ok(self.store.read(path).await?)
    }
}
