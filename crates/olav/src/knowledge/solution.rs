//! Standardized solution documents: episodic memory of past
//! troubleshooting.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionInput {
    pub title: String,
    pub problem: String,
    pub process: String,
    pub root_cause: String,
    pub solution: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl SolutionInput {
    /// Title lower-cased with non-alphanumerics collapsed to `-`.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.title.len());
        let mut pending_dash = false;
        for c in self.title.chars() {
            if c.is_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.extend(c.to_lowercase());
            } else {
                pending_dash = true;
            }
        }
        if slug.is_empty() {
            slug.push_str("solution");
        }
        slug
    }

    /// Render the standardized Markdown document.
    pub fn render(&self, recorded_at: OffsetDateTime) -> String {
        let mut out = String::new();
        out.push_str("---\n");
        out.push_str("category: solution\n");
        if let Some(platform) = &self.platform {
            out.push_str(&format!("platform: {platform}\n"));
        }
        if !self.tags.is_empty() {
            out.push_str(&format!("tags: [{}]\n", self.tags.join(", ")));
        }
        out.push_str(&format!(
            "recorded: {}\n",
            recorded_at.format(&Rfc3339).unwrap_or_default()
        ));
        out.push_str("---\n\n");
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("## Problem\n\n{}\n\n", self.problem.trim()));
        out.push_str(&format!("## Process\n\n{}\n\n", self.process.trim()));
        out.push_str(&format!("## Root Cause\n\n{}\n\n", self.root_cause.trim()));
        out.push_str(&format!("## Resolution\n\n{}\n", self.solution.trim()));
        if !self.commands.is_empty() {
            out.push_str("\n## Commands\n\n```\n");
            for command in &self.commands {
                out.push_str(command);
                out.push('\n');
            }
            out.push_str("```\n");
        }
        out
    }
}
