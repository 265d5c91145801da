//! Capability search for the model to discover what it may run.

use crate::capability::{CapabilityKind, CapabilityRegistry};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, optional_str, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 20;

pub struct SearchCapabilitiesTool {
    registry: Arc<CapabilityRegistry>,
}

impl SearchCapabilitiesTool {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for SearchCapabilitiesTool {
    fn name(&self) -> &str {
        "search_capabilities"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Search the whitelist of permitted commands and API operations."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "kind": {
                        "type": "string",
                        "enum": ["command", "api"],
                        "description": "Restrict to one capability kind."
                    },
                    "platform": {"type": "string"},
                    "limit": {"type": "integer", "default": DEFAULT_LIMIT}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let query = required_str(&args, "query")?;
        let kind = match optional_str(&args, "kind") {
            Some("command") => Some(CapabilityKind::Command),
            Some("api") => Some(CapabilityKind::Api),
            Some(other) => {
                return Err(ToolError::InvalidRequest(format!(
                    "kind must be 'command' or 'api', got '{other}'"
                )));
            }
            None => None,
        };
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let hits = self
            .registry
            .search(query, kind, optional_str(&args, "platform"), limit);
        let rows: Vec<Value> = hits
            .iter()
            .map(|cap| {
                json!({
                    "kind": cap.kind,
                    "platform": cap.platform,
                    "pattern": cap.pattern,
                    "method": cap.method,
                    "is_write": cap.is_write,
                    "description": cap.description,
                })
            })
            .collect();
        Ok(json!({"count": rows.len(), "capabilities": rows}).to_string())
    }
}
