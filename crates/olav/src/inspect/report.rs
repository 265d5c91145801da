//! Reduce phase: aggregate per-device summaries and render the report.
//!
//! The renderer is deterministic for a given report: maps are ordered and
//! no wall-clock reads happen during rendering. Reports above the token
//! limit are spilled to a file and replaced by a pointer.

use crate::error::{ErrorKind, Result};
use crate::inspect::plan::InspectionPlan;
use crate::tokens;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Pass,
    Warning,
    Fail,
    Skipped,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Pass => "PASS",
            Tier::Warning => "WARNING",
            Tier::Fail => "FAIL",
            Tier::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub tier: Tier,
    pub bullets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub tokens_raw: usize,
    pub tokens_final: usize,
}

impl DeviceSummary {
    pub fn skipped(reason: &str) -> Self {
        Self {
            tier: Tier::Skipped,
            bullets: vec![reason.to_string()],
            error_kind: None,
            tokens_raw: 0,
            tokens_final: 0,
        }
    }

    pub fn failed(kind: ErrorKind, message: String) -> Self {
        Self {
            tier: Tier::Fail,
            bullets: vec![message],
            error_kind: Some(kind),
            tokens_raw: 0,
            tokens_final: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportAggregate {
    pub pass: usize,
    pub warning: usize,
    pub fail: usize,
    pub skipped: usize,
    /// Worst offenders, at most five.
    pub top_failing: Vec<String>,
    pub dominant_errors: Vec<(ErrorKind, usize)>,
    /// Issues shared by more than one device.
    pub common_issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionReport {
    pub skill_id: String,
    pub skill_version: String,
    pub selector: String,
    pub parameters: BTreeMap<String, Value>,
    pub per_device: BTreeMap<String, DeviceSummary>,
    pub missing: Vec<String>,
    pub aggregate: ReportAggregate,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub cancelled: bool,
    /// Raw device bytes consumed by the map phase.
    pub bytes_in: u64,
}

/// A rendered report, possibly replaced by a pointer to a spill file.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub markdown: String,
    pub spilled_to: Option<PathBuf>,
}

/// Build the aggregate and assemble the report record.
pub fn reduce(
    plan: &InspectionPlan,
    per_device: BTreeMap<String, DeviceSummary>,
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    cancelled: bool,
    bytes_in: u64,
) -> InspectionReport {
    let mut aggregate = ReportAggregate::default();
    let mut error_counts: BTreeMap<&'static str, (ErrorKind, usize)> = BTreeMap::new();
    let mut issue_counts: BTreeMap<&str, usize> = BTreeMap::new();

    for (device, summary) in &per_device {
        match summary.tier {
            Tier::Pass => aggregate.pass += 1,
            Tier::Warning => aggregate.warning += 1,
            Tier::Fail => {
                aggregate.fail += 1;
                if aggregate.top_failing.len() < 5 {
                    aggregate.top_failing.push(device.clone());
                }
            }
            Tier::Skipped => aggregate.skipped += 1,
        }
        if let Some(kind) = summary.error_kind {
            error_counts.entry(kind.as_str()).or_insert((kind, 0)).1 += 1;
        }
        if matches!(summary.tier, Tier::Warning | Tier::Fail) {
            for bullet in &summary.bullets {
                *issue_counts.entry(bullet.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut dominant: Vec<(ErrorKind, usize)> = error_counts.into_values().collect();
    dominant.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.as_str().cmp(b.0.as_str())));
    aggregate.dominant_errors = dominant;

    let mut common: Vec<(&str, usize)> = issue_counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .collect();
    common.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    aggregate.common_issues = common
        .into_iter()
        .take(3)
        .map(|(issue, count)| format!("{issue} ({count} devices)"))
        .collect();

    InspectionReport {
        skill_id: plan.skill.id.clone(),
        skill_version: plan.skill.version.clone(),
        selector: plan.selector.to_string(),
        parameters: plan.parameters.clone(),
        per_device,
        missing: plan.missing.clone(),
        aggregate,
        started_at,
        finished_at,
        cancelled,
        bytes_in,
    }
}

impl InspectionReport {
    pub fn device_count(&self) -> usize {
        self.per_device.len()
    }

    /// Deterministic Markdown rendering.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Inspection Report: {}\n\n", self.skill_id));
        out.push_str(&format!(
            "- Skill: `{}` (version {})\n- Scope: `{}` ({} devices)\n- Started: {}\n- Finished: {}\n",
            self.skill_id,
            self.skill_version,
            self.selector,
            self.device_count(),
            stamp(&self.started_at),
            stamp(&self.finished_at),
        ));
        if self.cancelled {
            out.push_str("- **Cancelled**: partial results for completed devices only\n");
        }
        out.push('\n');

        out.push_str("## Overview\n\n");
        out.push_str("| Tier | Count |\n|---|---|\n");
        out.push_str(&format!("| PASS | {} |\n", self.aggregate.pass));
        out.push_str(&format!("| WARNING | {} |\n", self.aggregate.warning));
        out.push_str(&format!("| FAIL | {} |\n", self.aggregate.fail));
        out.push_str(&format!("| SKIPPED | {} |\n\n", self.aggregate.skipped));

        if !self.aggregate.top_failing.is_empty() {
            out.push_str(&format!(
                "Top failing: {}\n\n",
                self.aggregate.top_failing.join(", ")
            ));
        }
        if !self.aggregate.dominant_errors.is_empty() {
            let rendered: Vec<String> = self
                .aggregate
                .dominant_errors
                .iter()
                .map(|(kind, count)| format!("{} x{count}", kind.as_str()))
                .collect();
            out.push_str(&format!("Dominant errors: {}\n\n", rendered.join(", ")));
        }
        if !self.aggregate.common_issues.is_empty() {
            out.push_str("Common issues:\n");
            for issue in &self.aggregate.common_issues {
                out.push_str(&format!("- {issue}\n"));
            }
            out.push('\n');
        }

        out.push_str("## Devices\n\n");
        for (device, summary) in &self.per_device {
            out.push_str(&format!("### {device} — {}\n\n", summary.tier.as_str()));
            for bullet in &summary.bullets {
                out.push_str(&format!("- {bullet}\n"));
            }
            out.push('\n');
        }

        out.push_str("## Appendix\n\n");
        if !self.parameters.is_empty() {
            out.push_str("Parameters:\n");
            for (name, value) in &self.parameters {
                out.push_str(&format!("- `{name}` = {value}\n"));
            }
            out.push('\n');
        }
        if !self.missing.is_empty() {
            out.push_str(&format!(
                "Devices not found in inventory: {}\n\n",
                self.missing.join(", ")
            ));
        }
        let bytes_out = out.len() as u64;
        out.push_str(&format!(
            "Token accounting: {} raw bytes in, ~{} report bytes out\n",
            self.bytes_in, bytes_out
        ));
        out
    }

    /// Render, spilling to `<dir>/<skill>-<unix ts>.md` when the estimate
    /// exceeds the token limit.
    pub fn render_bounded(&self, token_limit: usize, spill_dir: &Path) -> Result<RenderedReport> {
        let markdown = self.render_markdown();
        if tokens::estimate(&markdown) <= token_limit {
            return Ok(RenderedReport {
                markdown,
                spilled_to: None,
            });
        }
        std::fs::create_dir_all(spill_dir)?;
        let path = spill_dir.join(format!(
            "{}-{}.md",
            self.skill_id,
            self.started_at.unix_timestamp()
        ));
        std::fs::write(&path, &markdown)?;
        let pointer = format!(
            "# Inspection Report: {} (spilled)\n\n\
             Full report ({} devices, ~{} tokens) written to `{}`.\n\n\
             PASS {} / WARNING {} / FAIL {} / SKIPPED {}\n",
            self.skill_id,
            self.device_count(),
            tokens::estimate(&markdown),
            path.display(),
            self.aggregate.pass,
            self.aggregate.warning,
            self.aggregate.fail,
            self.aggregate.skipped,
        );
        Ok(RenderedReport {
            markdown: pointer,
            spilled_to: Some(path),
        })
    }
}

fn stamp(ts: &OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| "-".to_string())
}
