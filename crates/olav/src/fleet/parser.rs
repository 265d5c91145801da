//! Template-parser seam.
//!
//! Output templates (TextFSM-style collections and the like) are external;
//! the engine only needs "rows or an error" plus a cheap availability
//! probe so it can skip the parse path entirely when no template exists.

use crate::error::Result;
use std::collections::BTreeMap;

/// One parsed row: ordered field name to value.
pub type ParsedRow = BTreeMap<String, String>;

pub trait TemplateParser: Send + Sync {
    /// Whether a template exists for `(platform, operation)`.
    fn has_template(&self, platform: &str, operation: &str) -> bool;

    /// Parse raw output into rows. Only called when `has_template` held.
    fn parse(&self, platform: &str, operation: &str, raw: &str) -> Result<Vec<ParsedRow>>;
}

/// Parser with no templates at all; every execution returns raw text.
pub struct NoTemplates;

impl TemplateParser for NoTemplates {
    fn has_template(&self, _platform: &str, _operation: &str) -> bool {
        false
    }

    fn parse(&self, _platform: &str, operation: &str, _raw: &str) -> Result<Vec<ParsedRow>> {
        Err(crate::error::OlavError::ParseFailed {
            operation: operation.to_string(),
            reason: "no template available".into(),
        })
    }
}
