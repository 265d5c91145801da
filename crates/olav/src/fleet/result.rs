use crate::fleet::device::Device;
use crate::fleet::parser::ParsedRow;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one successful device execution.
///
/// Failures travel as [`crate::error::OlavError`]; callers that need to
/// embed them in a larger artifact (the inspection report) keep the error
/// kind alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub device: String,
    /// The whitelist pattern the operation matched.
    pub pattern_matched: String,
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Vec<ParsedRow>>,
    /// True when a template parse succeeded and `parsed` is authoritative.
    pub structured: bool,
    pub tokens_raw: usize,
    pub tokens_parsed: usize,
    pub tokens_saved: usize,
    pub duration: Duration,
}

/// Result of resolving a selector: found devices plus the names the
/// inventory did not know. Misses never abort resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedScope {
    pub resolved: Vec<Device>,
    pub missing: Vec<String>,
}

impl ResolvedScope {
    pub fn names(&self) -> Vec<&str> {
        self.resolved.iter().map(|d| d.name.as_str()).collect()
    }
}
