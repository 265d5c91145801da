//! Inventory read-through.

use crate::fleet::{DeviceSelector, FleetEngine};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, optional_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

pub struct ListDevicesTool {
    engine: Arc<FleetEngine>,
}

impl ListDevicesTool {
    pub fn new(engine: Arc<FleetEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ListDevicesTool {
    fn name(&self) -> &str {
        "list_devices"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: "List inventory devices, optionally filtered by the selector grammar \
                          (name, comma list, 'all', group:/site:/role:/platform:)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filter": {
                        "type": "string",
                        "description": "Selector expression; omitted means every device."
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let filter = optional_str(&args, "filter").map(DeviceSelector::parse);
        let devices = self.engine.list_devices(filter.as_ref()).await?;
        let rows: Vec<Value> = devices
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "address": d.address,
                    "platform": d.platform,
                    "groups": d.groups,
                })
            })
            .collect();
        Ok(json!({"count": rows.len(), "devices": rows}).to_string())
    }
}
