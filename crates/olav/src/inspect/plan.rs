//! Plan preparation: parameter binding and scope resolution.

use crate::error::{OlavError, Result};
use crate::fleet::{DeviceSelector, FleetEngine};
use crate::inspect::catalog::SkillCatalog;
use crate::inspect::skill::{ParamKind, ParameterSpec, Skill};
use crate::fleet::Device;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-device timeout bounds: `estimated_runtime x 3`, clamped.
const MIN_DEVICE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DEVICE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct InspectionPlan {
    pub skill: Arc<Skill>,
    pub selector: DeviceSelector,
    /// Validated, coerced parameters with defaults applied.
    pub parameters: BTreeMap<String, Value>,
    pub devices: Vec<Device>,
    /// Names the inventory did not know; reported, never fatal.
    pub missing: Vec<String>,
    pub dry_run: bool,
}

impl InspectionPlan {
    pub fn estimated_device_count(&self) -> usize {
        self.devices.len()
    }

    /// Whole-device budget for the map phase.
    pub fn device_timeout(&self) -> Duration {
        let estimated = self.skill.estimated_runtime.unwrap_or(0);
        Duration::from_secs(estimated.saturating_mul(3))
            .clamp(MIN_DEVICE_TIMEOUT, MAX_DEVICE_TIMEOUT)
    }

    /// Substitute `{param}` placeholders into a step operation.
    pub fn bind_operation(&self, operation: &str) -> String {
        let mut bound = operation.to_string();
        for (name, value) in &self.parameters {
            let needle = format!("{{{name}}}");
            if bound.contains(&needle) {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                bound = bound.replace(&needle, &rendered);
            }
        }
        bound
    }
}

/// Validate inputs and resolve the device scope. With `dry_run` the plan
/// comes back ready to display but is never executed.
pub async fn prepare(
    catalog: &SkillCatalog,
    engine: &FleetEngine,
    skill_id: &str,
    selector: DeviceSelector,
    parameters: BTreeMap<String, Value>,
    dry_run: bool,
) -> Result<InspectionPlan> {
    let skill = catalog.get(skill_id)?;
    let parameters = bind_parameters(&skill, parameters)?;

    let scope = engine.resolve(&selector).await?;
    if scope.resolved.is_empty() {
        return Err(OlavError::EmptyScope(selector.to_string()));
    }

    Ok(InspectionPlan {
        skill,
        selector,
        parameters,
        devices: scope.resolved,
        missing: scope.missing,
        dry_run,
    })
}

/// Check presence and types, apply defaults, and coerce strings where the
/// conversion is unambiguous.
fn bind_parameters(
    skill: &Skill,
    supplied: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    for name in supplied.keys() {
        if skill.parameter(name).is_none() {
            return Err(OlavError::ParseFailed {
                operation: format!("parameters for skill '{}'", skill.id),
                reason: format!("unknown parameter '{name}'"),
            });
        }
    }

    let mut bound = BTreeMap::new();
    for spec in &skill.parameters {
        match supplied.get(&spec.name) {
            Some(value) => {
                bound.insert(spec.name.clone(), coerce(spec, value)?);
            }
            None => match &spec.default {
                Some(default) => {
                    bound.insert(spec.name.clone(), coerce(spec, default)?);
                }
                None if spec.required => {
                    return Err(OlavError::ParseFailed {
                        operation: format!("parameters for skill '{}'", skill.id),
                        reason: format!("missing required parameter '{}'", spec.name),
                    });
                }
                None => {}
            },
        }
    }
    Ok(bound)
}

fn coerce(spec: &ParameterSpec, value: &Value) -> Result<Value> {
    let mismatch = |got: &Value| OlavError::ParseFailed {
        operation: format!("parameter '{}'", spec.name),
        reason: format!("expected {:?}, got {got}", spec.kind),
    };
    match spec.kind {
        ParamKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(other)),
        },
        ParamKind::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch(value)),
            other => Err(mismatch(other)),
        },
        ParamKind::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch(value)),
            other => Err(mismatch(other)),
        },
        ParamKind::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch(value)),
            },
            other => Err(mismatch(other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::skill::{EXAMPLE_SKILL, parse_skill_file};
    use serde_json::json;
    use tempfile::TempDir;

    fn example_skill() -> Skill {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("interface-check.md");
        std::fs::write(&path, EXAMPLE_SKILL).unwrap();
        parse_skill_file(&path).unwrap()
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let skill = example_skill();
        let bound = bind_parameters(&skill, BTreeMap::new()).unwrap();
        assert_eq!(bound["max_errors"], json!(0));
    }

    #[test]
    fn unambiguous_string_coercion() {
        let skill = example_skill();
        let mut supplied = BTreeMap::new();
        supplied.insert("max_errors".to_string(), json!("25"));
        let bound = bind_parameters(&skill, supplied).unwrap();
        assert_eq!(bound["max_errors"], json!(25));
    }

    #[test]
    fn ambiguous_coercion_is_rejected() {
        let skill = example_skill();
        let mut supplied = BTreeMap::new();
        supplied.insert("max_errors".to_string(), json!("a few"));
        let err = bind_parameters(&skill, supplied).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParseFailed);
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let skill = example_skill();
        let mut supplied = BTreeMap::new();
        supplied.insert("threshold".to_string(), json!(1));
        assert!(bind_parameters(&skill, supplied).is_err());
    }

    #[test]
    fn device_timeout_is_clamped() {
        let mut skill = example_skill();
        let plan = |skill: &Skill| InspectionPlan {
            skill: Arc::new(skill.clone()),
            selector: DeviceSelector::All,
            parameters: BTreeMap::new(),
            devices: vec![],
            missing: vec![],
            dry_run: false,
        };

        // 20s estimate -> 60s budget
        assert_eq!(plan(&skill).device_timeout(), Duration::from_secs(60));

        skill.estimated_runtime = Some(1);
        assert_eq!(plan(&skill).device_timeout(), MIN_DEVICE_TIMEOUT);

        skill.estimated_runtime = Some(1000);
        assert_eq!(plan(&skill).device_timeout(), MAX_DEVICE_TIMEOUT);
    }

    #[test]
    fn bind_operation_substitutes_parameters() {
        let skill = example_skill();
        let mut parameters = BTreeMap::new();
        parameters.insert("max_errors".to_string(), json!(5));
        let plan = InspectionPlan {
            skill: Arc::new(skill),
            selector: DeviceSelector::All,
            parameters,
            devices: vec![],
            missing: vec![],
            dry_run: false,
        };
        assert_eq!(
            plan.bind_operation("show errors above {max_errors}"),
            "show errors above 5"
        );
        assert_eq!(plan.bind_operation("show version"), "show version");
    }
}
