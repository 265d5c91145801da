//! Maintain the alias table.

use crate::knowledge::{AliasEntry, AliasKind, KnowledgeStore, WriteOptions};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, optional_str, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct UpdateAliasTool {
    store: Arc<KnowledgeStore>,
}

impl UpdateAliasTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdateAliasTool {
    fn name(&self) -> &str {
        "update_alias"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Add or update a row in knowledge/aliases.md, keyed by (alias, type). \
                          Requires human approval."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "alias": {"type": "string", "description": "Human phrase, e.g. 'core-pair'."},
                    "type": {"type": "string", "enum": ["devices", "group"]},
                    "value": {
                        "type": "string",
                        "description": "Comma-separated device names, or a group tag."
                    },
                    "platform": {"type": "string"},
                    "notes": {"type": "string"}
                },
                "required": ["alias", "type", "value"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let entry = AliasEntry {
            alias: required_str(&args, "alias")?.to_string(),
            kind: AliasKind::parse(required_str(&args, "type")?)?,
            value: required_str(&args, "value")?.to_string(),
            platform: optional_str(&args, "platform").map(str::to_string),
            notes: optional_str(&args, "notes").map(str::to_string),
        };
        let opts = WriteOptions {
            origin: ctx.origin,
            approval: ctx.approval.clone(),
        };
        self.store.update_alias(&entry, &opts).await?;
        Ok(json!({"alias": entry.alias, "type": entry.kind, "value": entry.value}).to_string())
    }
}
