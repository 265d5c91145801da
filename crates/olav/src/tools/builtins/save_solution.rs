//! Record a troubleshooting episode as a solution document.

use crate::knowledge::{KnowledgeStore, SolutionInput, WriteOptions};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct SaveSolutionTool {
    store: Arc<KnowledgeStore>,
}

impl SaveSolutionTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SaveSolutionTool {
    fn name(&self) -> &str {
        "save_solution"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Save a resolved troubleshooting episode under knowledge/solutions/ \
                          so future searches find it. Requires human approval."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "problem": {"type": "string"},
                    "process": {"type": "string", "description": "What was checked, in order."},
                    "root_cause": {"type": "string"},
                    "solution": {"type": "string"},
                    "commands": {"type": "array", "items": {"type": "string"}},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "platform": {"type": "string"}
                },
                "required": ["title", "problem", "process", "root_cause", "solution"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let input: SolutionInput = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidRequest(format!("solution fields: {e}")))?;
        let opts = WriteOptions {
            origin: ctx.origin,
            approval: ctx.approval.clone(),
        };
        let rel = self.store.save_solution(&input, &opts).await?;
        Ok(json!({"saved": rel}).to_string())
    }
}
