use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What kind of operation a capability permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// A CLI command pattern sent over a device session.
    Command,
    /// A templated HTTP path on a system of record.
    Api,
}

/// One allowed operation, loaded from the import files.
///
/// Rows are never mutated in place; a reload builds a whole new set and
/// swaps it in one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    /// Free-form platform tag (`cisco_ios`, `huawei_vrp`, `netbox`, ...).
    pub platform: String,
    /// Command prefix pattern (trailing `*` = prefix match) or templated
    /// API path (`/dcim/devices/{id}/`).
    pub pattern: String,
    /// HTTP verb for API capabilities, `None` for commands.
    pub method: Option<String>,
    /// Parameter schema, API capabilities only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Write capabilities require human approval before execution.
    pub is_write: bool,
    pub description: String,
    /// Originating file, kept for rebuild traceability.
    pub source_file: PathBuf,
}

impl Capability {
    /// Identity under the `(kind, platform, pattern, method)` uniqueness
    /// invariant.
    pub fn identity(&self) -> (CapabilityKind, &str, &str, Option<&str>) {
        (
            self.kind,
            self.platform.as_str(),
            self.pattern.as_str(),
            self.method.as_deref(),
        )
    }

    /// Command matching: case-insensitive, whitespace-normalized. A pattern
    /// ending in `*` matches any operation whose trimmed form starts with
    /// the pattern prefix; otherwise the compare is exact.
    pub fn matches_command(&self, operation: &str) -> bool {
        if self.kind != CapabilityKind::Command {
            return false;
        }
        let op = normalize_command(operation);
        match self.pattern.strip_suffix('*') {
            Some(prefix) => op.starts_with(&normalize_command(prefix)),
            None => op == normalize_command(&self.pattern),
        }
    }

    /// API matching: exact method, and a segment-wise path compare where a
    /// `{var}` template segment consumes exactly one path segment.
    pub fn matches_api(&self, method: &str, path: &str) -> bool {
        if self.kind != CapabilityKind::Api {
            return false;
        }
        let Some(own_method) = self.method.as_deref() else {
            return false;
        };
        if !own_method.eq_ignore_ascii_case(method) {
            return false;
        }
        let pattern_segs: Vec<&str> = self.pattern.split('/').filter(|s| !s.is_empty()).collect();
        let path_segs: Vec<&str> = path
            .split('?')
            .next()
            .unwrap_or(path)
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if pattern_segs.len() != path_segs.len() {
            return false;
        }
        pattern_segs.iter().zip(&path_segs).all(|(pat, seg)| {
            (pat.starts_with('{') && pat.ends_with('}')) || pat.eq_ignore_ascii_case(seg)
        })
    }

    /// Specificity used to break ties when several patterns match one
    /// operation: exact patterns beat wildcards, longer prefixes beat
    /// shorter ones.
    pub fn specificity(&self) -> usize {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => prefix.trim().len() * 2,
            None => self.pattern.len() * 2 + 1,
        }
    }
}

/// Lowercase and collapse internal whitespace so `show  Version ` and
/// `show version` compare equal.
pub fn normalize_command(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
