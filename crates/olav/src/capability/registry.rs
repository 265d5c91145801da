//! Queryable capability index with atomic reload.

use crate::capability::loader::{load_apis_dir, load_commands_dir};
use crate::capability::types::{Capability, CapabilityKind, normalize_command};
use crate::error::{OlavError, Result};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Per-`(kind, platform)` counts returned by a successful reload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadSummary {
    pub loaded: BTreeMap<String, usize>,
}

impl ReloadSummary {
    pub fn total(&self) -> usize {
        self.loaded.values().sum()
    }
}

#[derive(Default)]
struct Index {
    caps: Vec<Arc<Capability>>,
}

impl Index {
    fn build(caps: Vec<Capability>) -> Self {
        // Enforce (kind, platform, pattern, method) uniqueness; a duplicate
        // row in the files is reported once and the first occurrence wins.
        let mut seen: HashSet<(CapabilityKind, String, String, Option<String>)> = HashSet::new();
        let mut out = Vec::with_capacity(caps.len());
        for cap in caps {
            let key = (
                cap.kind,
                cap.platform.clone(),
                cap.pattern.clone(),
                cap.method.clone(),
            );
            if seen.insert(key) {
                out.push(Arc::new(cap));
            } else {
                log::warn!(
                    "duplicate capability {} ({}) in {}, keeping first",
                    cap.pattern,
                    cap.platform,
                    cap.source_file.display()
                );
            }
        }
        Self { caps: out }
    }
}

/// Many-readers, single-writer-on-swap registry over the import files.
///
/// Readers always see a complete index; `reload` builds a new one off to
/// the side and replaces the pointer in a single step. If any file fails
/// to parse the previous index stays active.
pub struct CapabilityRegistry {
    commands_dir: PathBuf,
    apis_dir: PathBuf,
    index: ArcSwap<Index>,
}

impl CapabilityRegistry {
    pub fn new(commands_dir: PathBuf, apis_dir: PathBuf) -> Self {
        Self {
            commands_dir,
            apis_dir,
            index: ArcSwap::from_pointee(Index::default()),
        }
    }

    /// Rebuild the registry from files. Transactional.
    pub fn reload(&self) -> Result<ReloadSummary> {
        let mut caps = load_commands_dir(&self.commands_dir)
            .map_err(|e| OlavError::Internal(format!("capability reload: {e:#}")))?;
        caps.extend(
            load_apis_dir(&self.apis_dir)
                .map_err(|e| OlavError::Internal(format!("capability reload: {e:#}")))?,
        );

        let next = Index::build(caps);
        let mut summary = ReloadSummary::default();
        for cap in &next.caps {
            let key = match cap.kind {
                CapabilityKind::Command => format!("command/{}", cap.platform),
                CapabilityKind::Api => format!("api/{}", cap.platform),
            };
            *summary.loaded.entry(key).or_insert(0) += 1;
        }
        self.index.store(Arc::new(next));
        Ok(summary)
    }

    pub fn len(&self) -> usize {
        self.index.load().caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ranked substring search over patterns and descriptions.
    ///
    /// Ordering: exact prefix hits on the pattern first, then substring
    /// hits on the pattern, then description hits; ties broken by ascending
    /// pattern length.
    pub fn search(
        &self,
        query: &str,
        kind: Option<CapabilityKind>,
        platform: Option<&str>,
        limit: usize,
    ) -> Vec<Arc<Capability>> {
        let needle = query.trim().to_ascii_lowercase();
        let index = self.index.load();

        let mut hits: Vec<(u8, usize, Arc<Capability>)> = index
            .caps
            .iter()
            .filter(|cap| kind.is_none_or(|k| cap.kind == k))
            .filter(|cap| platform.is_none_or(|p| cap.platform.eq_ignore_ascii_case(p)))
            .filter_map(|cap| {
                let pattern = cap.pattern.to_ascii_lowercase();
                let rank = if pattern.starts_with(&needle) {
                    0
                } else if pattern.contains(&needle) {
                    1
                } else if cap.description.to_ascii_lowercase().contains(&needle) {
                    2
                } else {
                    return None;
                };
                Some((rank, cap.pattern.len(), Arc::clone(cap)))
            })
            .collect();

        hits.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.pattern.cmp(&b.2.pattern)));
        hits.into_iter().map(|(_, _, cap)| cap).take(limit).collect()
    }

    /// Match a CLI command against the whitelist. Unknown operations fail
    /// closed with `NotPermitted`.
    pub fn match_command(&self, platform: &str, operation: &str) -> Result<Arc<Capability>> {
        let index = self.index.load();
        index
            .caps
            .iter()
            .filter(|cap| {
                cap.kind == CapabilityKind::Command && cap.platform.eq_ignore_ascii_case(platform)
            })
            .filter(|cap| cap.matches_command(operation))
            .max_by_key(|cap| cap.specificity())
            .cloned()
            .ok_or_else(|| {
                OlavError::NotPermitted(format!(
                    "command '{}' is not whitelisted for {platform}",
                    normalize_command(operation)
                ))
            })
    }

    /// Match an API call against the whitelist.
    pub fn match_api(&self, system: &str, method: &str, path: &str) -> Result<Arc<Capability>> {
        let index = self.index.load();
        index
            .caps
            .iter()
            .filter(|cap| {
                cap.kind == CapabilityKind::Api && cap.platform.eq_ignore_ascii_case(system)
            })
            .filter(|cap| cap.matches_api(method, path))
            .max_by_key(|cap| cap.specificity())
            .cloned()
            .ok_or_else(|| {
                OlavError::NotPermitted(format!(
                    "{} {} is not whitelisted for {system}",
                    method.to_ascii_uppercase(),
                    path
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_with(commands: &[(&str, &str)]) -> (TempDir, CapabilityRegistry) {
        let dir = TempDir::new().unwrap();
        let commands_dir = dir.path().join("commands");
        let apis_dir = dir.path().join("apis");
        std::fs::create_dir_all(&commands_dir).unwrap();
        std::fs::create_dir_all(&apis_dir).unwrap();
        for (file, content) in commands {
            std::fs::write(commands_dir.join(file), content).unwrap();
        }
        let registry = CapabilityRegistry::new(commands_dir, apis_dir);
        registry.reload().unwrap();
        (dir, registry)
    }

    #[test]
    fn reload_counts_per_platform() {
        let (_dir, registry) = registry_with(&[
            ("cisco_ios.txt", "show version\nshow interface*\n"),
            ("huawei_vrp.txt", "display version\n"),
        ]);
        let summary = registry.reload().unwrap();
        assert_eq!(summary.loaded.get("command/cisco_ios"), Some(&2));
        assert_eq!(summary.loaded.get("command/huawei_vrp"), Some(&1));
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn reload_is_idempotent() {
        let (_dir, registry) = registry_with(&[("cisco_ios.txt", "show version\n")]);
        registry.reload().unwrap();
        registry.reload().unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_reload_keeps_previous_index() {
        let (dir, registry) = registry_with(&[("cisco_ios.txt", "show version\n")]);
        assert!(registry.match_command("cisco_ios", "show version").is_ok());

        // Drop a malformed OpenAPI document next to the good commands file.
        std::fs::write(dir.path().join("apis").join("broken.yaml"), "paths: 17").unwrap();
        assert!(registry.reload().is_err());

        // Previously-allowed operations still pass.
        assert!(registry.match_command("cisco_ios", "show version").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removing_a_file_removes_its_capabilities() {
        let (dir, registry) = registry_with(&[
            ("cisco_ios.txt", "show version\n"),
            ("arista_eos.txt", "show version\n"),
        ]);
        assert!(registry.match_command("arista_eos", "show version").is_ok());

        std::fs::remove_file(dir.path().join("commands").join("arista_eos.txt")).unwrap();
        registry.reload().unwrap();

        assert!(registry.match_command("arista_eos", "show version").is_err());
        assert!(registry.match_command("cisco_ios", "show version").is_ok());
    }

    #[test]
    fn unknown_operation_fails_closed() {
        let (_dir, registry) = registry_with(&[("cisco_ios.txt", "show version\n")]);
        let err = registry
            .match_command("cisco_ios", "erase startup-config")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotPermitted);
    }

    #[test]
    fn most_specific_pattern_wins() {
        let (_dir, registry) = registry_with(&[(
            "cisco_ios.txt",
            "show interface*\nshow interfaces status\n",
        )]);
        let cap = registry
            .match_command("cisco_ios", "show interfaces status")
            .unwrap();
        assert_eq!(cap.pattern, "show interfaces status");

        let cap = registry
            .match_command("cisco_ios", "show interface Gi0/1")
            .unwrap();
        assert_eq!(cap.pattern, "show interface*");
    }

    #[test]
    fn search_ranks_prefix_before_substring_before_description() {
        let (_dir, registry) = registry_with(&[(
            "cisco_ios.txt",
            "show interface*\nclear counters interface  # reset interface counters\nshow ip interface brief\n",
        )]);
        let hits = registry.search("interface", None, None, 10);
        assert_eq!(hits.len(), 3);
        // none of the patterns start with "interface", so substring hits
        // come first, shortest pattern first
        assert_eq!(hits[0].pattern, "show interface*");
        assert_eq!(hits[1].pattern, "show ip interface brief");
        assert_eq!(hits[2].pattern, "clear counters interface");
    }
}
