//! Hybrid search over skills, solutions, and knowledge documents.

use crate::knowledge::{DocCategory, KnowledgeStore, SearchFilters};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, optional_str, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct SearchKnowledgeTool {
    store: Arc<KnowledgeStore>,
}

impl SearchKnowledgeTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Search the knowledge base (skills, past solutions, conventions) with \
                          hybrid lexical+vector retrieval."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "category": {
                        "type": "string",
                        "enum": ["skill", "solution", "alias", "note"]
                    },
                    "platform": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let query = required_str(&args, "query")?;
        let category = match optional_str(&args, "category") {
            Some("skill") => Some(DocCategory::Skill),
            Some("solution") => Some(DocCategory::Solution),
            Some("alias") => Some(DocCategory::Alias),
            Some("note") => Some(DocCategory::Note),
            Some(other) => {
                return Err(ToolError::InvalidRequest(format!(
                    "unknown category '{other}'"
                )));
            }
            None => None,
        };
        let filters = SearchFilters {
            category,
            platform: optional_str(&args, "platform").map(str::to_string),
            tags: args
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize);

        let hits = self.store.search(query, &filters, limit).await?;
        let rows: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "doc_id": h.doc_id,
                    "score": h.score,
                    "snippet": h.snippet,
                })
            })
            .collect();
        Ok(json!({"count": rows.len(), "hits": rows}).to_string())
    }
}
