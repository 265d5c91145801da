//! In-memory skill catalog with explicit reload.

use crate::error::{OlavError, Result};
use crate::inspect::skill::{Skill, is_disabled_filename, parse_skill_file};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Skills indexed by id. Readers get consistent snapshots; `reload`
/// builds a fresh map and swaps it in one step.
pub struct SkillCatalog {
    dir: PathBuf,
    skills: ArcSwap<HashMap<String, Arc<Skill>>>,
}

impl SkillCatalog {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            skills: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Re-read the skills directory. A skill that fails to parse is
    /// skipped with an error logged; the rest of the catalog loads. The
    /// count of enabled skills is returned.
    pub fn reload(&self) -> Result<usize> {
        let mut skills = HashMap::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.skills.store(Arc::new(skills));
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        paths.sort();

        for path in paths {
            if is_disabled_filename(&path) {
                continue;
            }
            match parse_skill_file(&path) {
                Ok(skill) if skill.enabled => {
                    if let Some(previous) =
                        skills.insert(skill.id.clone(), Arc::new(skill))
                    {
                        log::warn!(
                            "duplicate skill id '{}', earlier file {} is shadowed",
                            previous.id,
                            previous.path.display()
                        );
                    }
                }
                Ok(skill) => {
                    log::debug!("skill '{}' disabled, skipping", skill.id);
                }
                Err(e) => {
                    log::error!("skipping unparseable skill {}: {e:#}", path.display());
                }
            }
        }

        let count = skills.len();
        self.skills.store(Arc::new(skills));
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Skill>> {
        self.skills
            .load()
            .get(id)
            .cloned()
            .ok_or_else(|| OlavError::not_found(format!("skill '{id}'")))
    }

    pub fn len(&self) -> usize {
        self.skills.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// One line per skill, for tool descriptions and `status` output.
    pub fn list_for_description(&self) -> String {
        let skills = self.skills.load();
        if skills.is_empty() {
            return "No skills available".to_string();
        }
        let mut lines: Vec<String> = skills
            .values()
            .map(|s| {
                let platforms: Vec<&str> =
                    s.platforms.keys().map(String::as_str).collect();
                format!(
                    "- {}: {} [{}]",
                    s.id,
                    s.description,
                    platforms.join(", ")
                )
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }
}
