//! Skill documents.
//!
//! A skill is a Markdown file: a YAML frontmatter header declaring
//! identity and typed parameters, a prose body, a `## Platforms` section
//! with one fenced command block per platform, and an optional
//! `## Criteria` section with acceptance criteria. Files whose basename
//! starts with `_`, or with `enabled: false` in the header, are disabled.

use crate::inspect::criteria::Criterion;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Declared parameter type. Strings coerce to ints/bools/floats only when
/// unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[default]
    String,
    Int,
    Float,
    Bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: ParamKind,

    #[serde(default)]
    pub required: bool,

    /// Applied when the caller omits the parameter.
    #[serde(default)]
    pub default: Option<serde_json::Value>,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Frontmatter header of a skill document.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillHeader {
    /// Defaults to the file stem when omitted.
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,
    pub description: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub version: Option<String>,

    /// Phrases that should surface this skill in retrieval.
    #[serde(default)]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Expected single-device runtime in seconds; drives the per-device
    /// timeout (`x3`, clamped to [30, 600]).
    #[serde(default)]
    pub estimated_runtime: Option<u64>,

    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// One step of a per-platform command sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillStep {
    /// A CLI command, or `METHOD /path` for an API call. May carry
    /// `{param}` placeholders bound at plan time.
    pub operation: String,
    /// Independent steps may overlap with adjacent independent steps.
    pub independent: bool,
}

#[derive(Debug, Clone)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub triggers: Vec<String>,
    pub tags: Vec<String>,
    pub estimated_runtime: Option<u64>,
    pub parameters: Vec<ParameterSpec>,
    /// Ordered command sequence per platform tag.
    pub platforms: BTreeMap<String, Vec<SkillStep>>,
    pub criteria: Vec<Criterion>,
    /// Markdown body (instructions, troubleshooting, prose).
    pub body: String,
    pub path: PathBuf,
    /// Header `version`, or a content fingerprint when absent.
    pub version: String,
}

impl Skill {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn supports_platform(&self, platform: &str) -> bool {
        self.platforms.contains_key(platform)
    }
}

/// Whether a path is disabled by the `_` filename convention.
pub fn is_disabled_filename(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('_'))
}

/// Parse one skill file. Disabled skills parse successfully with
/// `enabled == false`; the catalog decides whether to list them.
pub fn parse_skill_file(path: &Path) -> Result<Skill> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let parsed = gray_matter::Matter::<gray_matter::engine::YAML>::new()
        .parse::<SkillHeader>(&content)
        .with_context(|| format!("Failed to parse file {}", path.display()))?;

    let header: SkillHeader = parsed
        .data
        .ok_or_else(|| anyhow::anyhow!("Missing YAML frontmatter in {}", path.display()))?;

    if header.name.trim().is_empty() {
        bail!("Skill 'name' cannot be empty in {}", path.display());
    }
    if header.description.trim().is_empty() {
        bail!("Skill 'description' cannot be empty in {}", path.display());
    }

    let id = header
        .id
        .clone()
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .ok_or_else(|| anyhow::anyhow!("Cannot derive skill id from {}", path.display()))?;

    let body = parsed.content;
    let platforms = parse_platform_sections(&body)
        .with_context(|| format!("Bad platform section in {}", path.display()))?;
    let criteria = parse_criteria_section(&body)
        .with_context(|| format!("Bad criteria section in {}", path.display()))?;

    let enabled = header.enabled && !is_disabled_filename(path);
    let version = header
        .version
        .clone()
        .unwrap_or_else(|| crate::hash::fingerprint("skill", &content)[..12].to_string());

    Ok(Skill {
        id,
        name: header.name,
        description: header.description,
        enabled,
        triggers: header.triggers,
        tags: header.tags,
        estimated_runtime: header.estimated_runtime,
        parameters: header.parameters,
        platforms,
        criteria,
        body,
        path: path.to_path_buf(),
        version,
    })
}

/// Extract `### <platform>` fenced command blocks under `## Platforms`.
fn parse_platform_sections(body: &str) -> Result<BTreeMap<String, Vec<SkillStep>>> {
    let mut platforms = BTreeMap::new();
    let mut in_platforms = false;
    let mut current: Option<String> = None;
    let mut in_fence = false;

    for line in body.lines() {
        let trimmed = line.trim_end();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            in_platforms = heading.trim().eq_ignore_ascii_case("platforms");
            current = None;
            in_fence = false;
            continue;
        }
        if !in_platforms {
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix("### ") {
            current = Some(heading.trim().to_string());
            continue;
        }
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            let Some(platform) = &current else {
                bail!("command block outside a platform heading");
            };
            let line = trimmed.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (operation, independent) = match line.strip_suffix(" &") {
                Some(op) => (op.trim(), true),
                None => (line, false),
            };
            platforms
                .entry(platform.clone())
                .or_insert_with(Vec::new)
                .push(SkillStep {
                    operation: operation.to_string(),
                    independent,
                });
        }
    }
    Ok(platforms)
}

/// Extract criteria lines from the fenced block under `## Criteria`.
fn parse_criteria_section(body: &str) -> Result<Vec<Criterion>> {
    let mut criteria = Vec::new();
    let mut in_criteria = false;
    let mut in_fence = false;

    for line in body.lines() {
        let trimmed = line.trim_end();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            in_criteria = heading.trim().eq_ignore_ascii_case("criteria");
            in_fence = false;
            continue;
        }
        if !in_criteria {
            continue;
        }
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            if let Some(criterion) =
                Criterion::parse(trimmed).map_err(|e| anyhow::anyhow!("{e}"))?
            {
                criteria.push(criterion);
            }
        }
    }
    Ok(criteria)
}

#[cfg(test)]
pub(crate) const EXAMPLE_SKILL: &str = r#"---
id: interface-check
name: Interface Check
description: Verify interface health and error counters across the fleet
version: "1.2"
estimated_runtime: 20
tags: [interfaces, health]
triggers:
  - interface errors
parameters:
  - name: max_errors
    type: int
    required: false
    default: 0
    description: Highest tolerated input error count
---

# Interface Check

Walk the interface table and flag error counters above the threshold.

## Platforms

### cisco_ios

```commands
show interfaces status
show interfaces counters errors &
```

### huawei_vrp

```commands
display interface brief
```

## Criteria

```criteria
fail when input_errors > {max_errors}
warn when status == notconnect
```

## Troubleshooting

Check SFP seating and far-end duplex on WARNING interfaces.
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_skill(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parse_full_document() {
        let dir = TempDir::new().unwrap();
        let path = write_skill(&dir, "interface-check.md", EXAMPLE_SKILL);

        let skill = parse_skill_file(&path).unwrap();
        assert_eq!(skill.id, "interface-check");
        assert_eq!(skill.name, "Interface Check");
        assert!(skill.enabled);
        assert_eq!(skill.version, "1.2");
        assert_eq!(skill.estimated_runtime, Some(20));
        assert_eq!(skill.parameters.len(), 1);
        assert_eq!(skill.parameters[0].kind, ParamKind::Int);

        let ios = &skill.platforms["cisco_ios"];
        assert_eq!(ios.len(), 2);
        assert_eq!(ios[0].operation, "show interfaces status");
        assert!(!ios[0].independent);
        assert!(ios[1].independent);

        assert!(skill.supports_platform("huawei_vrp"));
        assert!(!skill.supports_platform("junos"));
        assert_eq!(skill.criteria.len(), 2);
        assert!(skill.body.contains("SFP seating"));
    }

    #[test]
    fn id_falls_back_to_file_stem() {
        let dir = TempDir::new().unwrap();
        let path = write_skill(
            &dir,
            "bgp-health.md",
            "---\nname: BGP Health\ndescription: Session check\n---\nBody\n",
        );
        let skill = parse_skill_file(&path).unwrap();
        assert_eq!(skill.id, "bgp-health");
        // no header version: a content fingerprint stands in
        assert_eq!(skill.version.len(), 12);
    }

    #[test]
    fn disabled_by_header_and_by_filename() {
        let dir = TempDir::new().unwrap();
        let path = write_skill(
            &dir,
            "old.md",
            "---\nname: Old\ndescription: Retired\nenabled: false\n---\n",
        );
        assert!(!parse_skill_file(&path).unwrap().enabled);

        let path = write_skill(
            &dir,
            "_draft.md",
            "---\nname: Draft\ndescription: WIP\n---\n",
        );
        assert!(!parse_skill_file(&path).unwrap().enabled);
    }

    #[test]
    fn missing_frontmatter_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_skill(&dir, "plain.md", "# Just prose\n");
        assert!(parse_skill_file(&path).is_err());
    }

    #[test]
    fn bad_criteria_fail_the_parse() {
        let dir = TempDir::new().unwrap();
        let path = write_skill(
            &dir,
            "broken.md",
            "---\nname: Broken\ndescription: Bad criteria\n---\n## Criteria\n\n```criteria\nfail when count >\n```\n",
        );
        assert!(parse_skill_file(&path).is_err());
    }
}
