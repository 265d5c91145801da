//! The `aliases.md` table: human phrases mapped to device lists or group
//! selectors. Rows are keyed by `(alias, type)`; updates replace in place
//! and new aliases append.

use crate::error::{OlavError, Result};
use serde::{Deserialize, Serialize};

const TABLE_HEADER: &str = "| alias | type | value | platform | notes |\n|---|---|---|---|---|";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasKind {
    /// Comma-separated device names.
    Devices,
    /// A group selector tag.
    Group,
}

impl AliasKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasKind::Devices => "devices",
            AliasKind::Group => "group",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "devices" => Ok(AliasKind::Devices),
            "group" => Ok(AliasKind::Group),
            other => Err(OlavError::ParseFailed {
                operation: "alias type".into(),
                reason: format!("expected 'devices' or 'group', got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub alias: String,
    pub kind: AliasKind,
    pub value: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AliasEntry {
    fn render_row(&self) -> String {
        format!(
            "| {} | {} | {} | {} | {} |",
            cell(&self.alias),
            self.kind.as_str(),
            cell(&self.value),
            cell(self.platform.as_deref().unwrap_or("-")),
            cell(self.notes.as_deref().unwrap_or("-")),
        )
    }
}

fn cell(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "-".to_string()
    } else {
        trimmed.replace('|', "/")
    }
}

fn uncell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse every data row of an aliases table. Unparseable rows are skipped.
pub fn parse_table(text: &str) -> Vec<AliasEntry> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with('|') || line.contains("---") {
                return None;
            }
            let cells: Vec<&str> = line
                .trim_matches('|')
                .split('|')
                .map(str::trim)
                .collect();
            if cells.len() < 3 || cells[0].eq_ignore_ascii_case("alias") {
                return None;
            }
            let kind = AliasKind::parse(cells[1]).ok()?;
            Some(AliasEntry {
                alias: cells[0].to_string(),
                kind,
                value: cells[2].to_string(),
                platform: cells.get(3).and_then(|c| uncell(c)),
                notes: cells.get(4).and_then(|c| uncell(c)),
            })
        })
        .collect()
}

/// Replace the row keyed `(alias, type)` or append a new one, returning
/// the updated document.
pub fn upsert_row(text: &str, entry: &AliasEntry) -> String {
    let mut lines: Vec<String> = if text.trim().is_empty() {
        vec!["# Device Aliases".to_string(), String::new()]
    } else {
        text.lines().map(str::to_string).collect()
    };

    if !lines.iter().any(|l| l.trim_start().starts_with("| alias |")) {
        lines.push(TABLE_HEADER.to_string());
    }

    let mut replaced = false;
    for line in lines.iter_mut() {
        let Some(existing) = parse_table(line).into_iter().next() else {
            continue;
        };
        if existing.alias.eq_ignore_ascii_case(&entry.alias) && existing.kind == entry.kind {
            *line = entry.render_row();
            replaced = true;
            break;
        }
    }
    if !replaced {
        lines.push(entry.render_row());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Similarity floor for fuzzy alias lookup.
const FUZZY_THRESHOLD: f64 = 0.88;

/// Look up an alias, newest row first for duplicate names of differing
/// type. Falls back to a close fuzzy match so operator phrasing like
/// "core pair" still resolves "core-pair".
pub fn resolve<'a>(entries: &'a [AliasEntry], alias: &str) -> Option<&'a AliasEntry> {
    if let Some(exact) = entries
        .iter()
        .rev()
        .find(|e| e.alias.eq_ignore_ascii_case(alias))
    {
        return Some(exact);
    }
    let wanted = alias.to_ascii_lowercase();
    entries
        .iter()
        .rev()
        .map(|e| {
            (
                strsim::jaro_winkler(&e.alias.to_ascii_lowercase(), &wanted),
                e,
            )
        })
        .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, e)| e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(alias: &str, kind: AliasKind, value: &str) -> AliasEntry {
        AliasEntry {
            alias: alias.to_string(),
            kind,
            value: value.to_string(),
            platform: None,
            notes: None,
        }
    }

    #[test]
    fn upsert_into_empty_document_creates_the_table() {
        let text = upsert_row("", &entry("core-pair", AliasKind::Devices, "R1,R2"));
        assert!(text.contains("| alias | type | value |"));
        let entries = parse_table(&text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].alias, "core-pair");
        assert_eq!(entries[0].value, "R1,R2");
    }

    #[test]
    fn upsert_replaces_matching_key() {
        let text = upsert_row("", &entry("core-pair", AliasKind::Devices, "R1,R2"));
        let text = upsert_row(&text, &entry("core-pair", AliasKind::Devices, "R1,R2,R3"));
        let entries = parse_table(&text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "R1,R2,R3");
    }

    #[test]
    fn same_alias_different_type_appends() {
        let text = upsert_row("", &entry("core", AliasKind::Devices, "R1,R2"));
        let text = upsert_row(&text, &entry("core", AliasKind::Group, "core"));
        let entries = parse_table(&text);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn parse_skips_malformed_rows_and_preserves_optionals() {
        let doc = "\
# Device Aliases

| alias | type | value | platform | notes |
|---|---|---|---|---|
| edge | group | edge | cisco_ios | all edge boxes |
| broken row without enough cells |
| lab | devices | SW1 | - | - |
";
        let entries = parse_table(doc);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].platform.as_deref(), Some("cisco_ios"));
        assert_eq!(entries[0].notes.as_deref(), Some("all edge boxes"));
        assert_eq!(entries[1].platform, None);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let text = upsert_row("", &entry("Core-Pair", AliasKind::Devices, "R1,R2"));
        let entries = parse_table(&text);
        assert!(resolve(&entries, "core-pair").is_some());
        assert!(resolve(&entries, "nope").is_none());
    }

    #[test]
    fn resolve_tolerates_near_misses() {
        let text = upsert_row("", &entry("core-pair", AliasKind::Devices, "R1,R2"));
        let entries = parse_table(&text);
        assert!(resolve(&entries, "core pair").is_some());
        assert!(resolve(&entries, "corepair").is_some());
        assert!(resolve(&entries, "edge routers").is_none());
    }
}
