//! File scanners behind `reload()`.
//!
//! Commands directory: one plain-text file per platform, one operation per
//! line. `#` starts a comment line, a `!` prefix marks a write operation,
//! a trailing `*` marks a prefix pattern, and an inline ` # ...` tail is
//! kept as the description. API directory: one OpenAPI 3 document per
//! system; `x-olav-write: true` on an operation marks it as write.
//!
//! Files whose basename begins with `_` are skipped in both directories.

use crate::capability::types::{Capability, CapabilityKind};
use anyhow::{Context, Result, bail};
use std::path::Path;

const API_METHODS: &[&str] = &["get", "put", "post", "delete", "patch", "head", "options"];

pub(crate) fn is_disabled(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('_'))
}

/// Scan `<dir>/*.txt` into command capabilities.
pub fn load_commands_dir(dir: &Path) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();
    if !dir.is_dir() {
        return Ok(caps);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if is_disabled(&path) || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let platform = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("Bad file name {}", path.display()))?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (is_write, line) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };
            let (pattern, description) = match line.split_once(" #") {
                Some((pat, desc)) => (pat.trim(), desc.trim()),
                None => (line, ""),
            };
            if pattern.is_empty() {
                bail!(
                    "{}:{}: empty operation pattern",
                    path.display(),
                    lineno + 1
                );
            }
            caps.push(Capability {
                kind: CapabilityKind::Command,
                platform: platform.clone(),
                pattern: pattern.to_string(),
                method: None,
                parameters: None,
                is_write,
                description: description.to_string(),
                source_file: path.clone(),
            });
        }
    }
    Ok(caps)
}

/// Scan `<dir>/*.{yaml,yml,json}` OpenAPI documents into API capabilities.
pub fn load_apis_dir(dir: &Path) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();
    if !dir.is_dir() {
        return Ok(caps);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if is_disabled(&path) {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let doc: serde_json::Value = match ext {
            "json" => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            "yaml" | "yml" => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            _ => continue,
        };
        let system = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("Bad file name {}", path.display()))?;
        caps.extend(extract_api_operations(&doc, &system, &path)?);
    }
    Ok(caps)
}

fn extract_api_operations(
    doc: &serde_json::Value,
    system: &str,
    source: &Path,
) -> Result<Vec<Capability>> {
    let paths = doc
        .get("paths")
        .and_then(|p| p.as_object())
        .with_context(|| format!("{}: missing 'paths' object", source.display()))?;

    let mut caps = Vec::new();
    for (path_template, item) in paths {
        let Some(item) = item.as_object() else {
            bail!(
                "{}: path item {} is not an object",
                source.display(),
                path_template
            );
        };
        for (method, op) in item {
            if !API_METHODS.contains(&method.to_ascii_lowercase().as_str()) {
                continue;
            }
            let summary = op
                .get("summary")
                .or_else(|| op.get("description"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let is_write = op
                .get("x-olav-write")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let parameters = op.get("parameters").cloned();
            caps.push(Capability {
                kind: CapabilityKind::Api,
                platform: system.to_string(),
                pattern: path_template.clone(),
                method: Some(method.to_ascii_uppercase()),
                parameters,
                is_write,
                description: summary,
                source_file: source.to_path_buf(),
            });
        }
    }
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn commands_file_grammar() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("cisco_ios.txt"),
            "# read-only surface\nshow version\nshow interface*  # interface state\n!configure terminal\n\n",
        )
        .unwrap();

        let caps = load_commands_dir(dir.path()).unwrap();
        assert_eq!(caps.len(), 3);
        assert!(caps.iter().all(|c| c.platform == "cisco_ios"));

        let show_ver = caps.iter().find(|c| c.pattern == "show version").unwrap();
        assert!(!show_ver.is_write);

        let show_int = caps.iter().find(|c| c.pattern == "show interface*").unwrap();
        assert_eq!(show_int.description, "interface state");

        let conf = caps
            .iter()
            .find(|c| c.pattern == "configure terminal")
            .unwrap();
        assert!(conf.is_write);
    }

    #[test]
    fn underscore_prefixed_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("_draft.txt"), "show version\n").unwrap();
        std::fs::write(dir.path().join("arista_eos.txt"), "show version\n").unwrap();

        let caps = load_commands_dir(dir.path()).unwrap();
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].platform, "arista_eos");
    }

    #[test]
    fn openapi_yaml_with_write_annotation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("netbox.yaml"),
            r#"
openapi: "3.0.0"
paths:
  /dcim/devices/:
    get:
      summary: List devices
  /dcim/devices/{id}/:
    patch:
      summary: Update a device
      x-olav-write: true
"#,
        )
        .unwrap();

        let caps = load_apis_dir(dir.path()).unwrap();
        assert_eq!(caps.len(), 2);

        let list = caps
            .iter()
            .find(|c| c.method.as_deref() == Some("GET"))
            .unwrap();
        assert_eq!(list.pattern, "/dcim/devices/");
        assert!(!list.is_write);
        assert_eq!(list.description, "List devices");

        let update = caps
            .iter()
            .find(|c| c.method.as_deref() == Some("PATCH"))
            .unwrap();
        assert!(update.is_write);
        assert_eq!(update.platform, "netbox");
    }

    #[test]
    fn malformed_document_fails_the_scan() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "paths: [not, a, map]").unwrap();
        assert!(load_apis_dir(dir.path()).is_err());
    }

    #[test]
    fn missing_directories_load_empty() {
        let dir = TempDir::new().unwrap();
        let absent = dir.path().join("nope");
        assert!(load_commands_dir(&absent).unwrap().is_empty());
        assert!(load_apis_dir(&absent).unwrap().is_empty());
    }
}
