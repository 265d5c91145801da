//! Plan and run fleet inspections.

use crate::fleet::{DeviceSelector, FleetEngine};
use crate::inspect::{InspectionRunner, SkillCatalog, prepare};
use crate::tools::context::{Tool, ToolContext, ToolError, ToolSpec, required_str};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct InspectTool {
    catalog: Arc<SkillCatalog>,
    engine: Arc<FleetEngine>,
    runner: Arc<InspectionRunner>,
}

impl InspectTool {
    pub fn new(
        catalog: Arc<SkillCatalog>,
        engine: Arc<FleetEngine>,
        runner: Arc<InspectionRunner>,
    ) -> Self {
        Self {
            catalog,
            engine,
            runner,
        }
    }
}

#[async_trait]
impl Tool for InspectTool {
    fn name(&self) -> &str {
        "inspect"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: format!(
                "Fan a skill out over a device set and reduce the results into a report. \
                 Available skills:\n{}",
                self.catalog.list_for_description()
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "skill": {"type": "string", "description": "Skill id."},
                    "selector": {"type": "string", "description": "Device selector expression."},
                    "parameters": {
                        "type": "object",
                        "description": "Skill parameters; strings are coerced to the declared types."
                    },
                    "dry_run": {
                        "type": "boolean",
                        "description": "Return the plan without executing.",
                        "default": false
                    },
                    "persist": {
                        "type": "boolean",
                        "description": "Store the report under knowledge/reports/.",
                        "default": false
                    }
                },
                "required": ["skill", "selector"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let skill_id = required_str(&args, "skill")?;
        let selector = DeviceSelector::parse(required_str(&args, "selector")?);
        let parameters: BTreeMap<String, Value> = args
            .get("parameters")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let dry_run = args.get("dry_run").and_then(Value::as_bool).unwrap_or(false);
        let persist = args.get("persist").and_then(Value::as_bool).unwrap_or(false);

        let plan = prepare(
            &self.catalog,
            &self.engine,
            skill_id,
            selector,
            parameters,
            dry_run,
        )
        .await?;

        if plan.dry_run {
            let devices: Vec<&str> = plan.devices.iter().map(|d| d.name.as_str()).collect();
            return Ok(json!({
                "dry_run": true,
                "skill": plan.skill.id,
                "skill_version": plan.skill.version,
                "devices": devices,
                "missing": plan.missing,
                "parameters": plan.parameters,
                "device_timeout_secs": plan.device_timeout().as_secs(),
            })
            .to_string());
        }

        let report = self
            .runner
            .run(plan, ctx.cancel.clone(), persist)
            .await?;
        let rendered = self.runner.render(&report)?;
        Ok(rendered.markdown)
    }
}
