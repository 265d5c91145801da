//! Selector resolution with alias expansion.
//!
//! Aliases from `knowledge/aliases.md` are consulted first, so an
//! operator phrase like "core-pair" expands to its device list before the
//! selector grammar applies.

use crate::fleet::{DeviceSelector, FleetEngine};
use crate::knowledge::{AliasKind, KnowledgeStore};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct ResolveSelectorTool {
    engine: Arc<FleetEngine>,
    store: Arc<KnowledgeStore>,
}

impl ResolveSelectorTool {
    pub fn new(engine: Arc<FleetEngine>, store: Arc<KnowledgeStore>) -> Self {
        Self { engine, store }
    }

    async fn expand_alias(&self, raw: &str) -> DeviceSelector {
        let aliases = self.store.aliases().await.unwrap_or_default();
        match crate::knowledge::alias_resolve(&aliases, raw) {
            Some(entry) => match entry.kind {
                AliasKind::Devices => DeviceSelector::parse(&entry.value),
                AliasKind::Group => DeviceSelector::Group(entry.value.clone()),
            },
            None => DeviceSelector::parse(raw),
        }
    }
}

#[async_trait]
impl Tool for ResolveSelectorTool {
    fn name(&self) -> &str {
        "resolve_selector"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "Resolve a selector or alias into concrete devices. Reports names the \
                          inventory does not know without failing."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "Name, comma list, 'all', keyed filter, or an alias."
                    }
                },
                "required": ["selector"]
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let raw = required_str(&args, "selector")?;
        let selector = self.expand_alias(raw).await;
        let scope = self.engine.resolve(&selector).await?;
        Ok(json!({
            "selector": selector.to_string(),
            "resolved": scope.names(),
            "missing": scope.missing,
        })
        .to_string())
    }
}
