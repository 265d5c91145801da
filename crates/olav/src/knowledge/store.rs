//! The path-addressed document store.
//!
//! All access goes through the permission matrix in [`crate::knowledge::paths`].
//! Writes are atomic (same-directory temp file, flush, rename) and queue
//! the touched document for re-indexing through a bounded channel.
//! Agent-context writes require an approval fingerprint; administrative
//! writes (orchestrator persistence, operator CLI) bypass the gate.

use crate::error::{OlavError, Result};
use crate::knowledge::alias::{self, AliasEntry};
use crate::knowledge::index::SearchIndex;
use crate::knowledge::paths::{Access, classify};
use crate::knowledge::search::{SearchFilters, SearchHit};
use crate::knowledge::solution::SolutionInput;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Depth of the re-index queue; writers wait when it is full.
const REINDEX_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Tool call on behalf of the model; write gates apply.
    Agent,
    /// Direct operator or orchestrator write.
    Administrative,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub origin: WriteOrigin,
    /// Fingerprint approved on the owning thread, if any.
    pub approval: Option<String>,
}

impl WriteOptions {
    pub fn administrative() -> Self {
        Self {
            origin: WriteOrigin::Administrative,
            approval: None,
        }
    }

    pub fn agent() -> Self {
        Self {
            origin: WriteOrigin::Agent,
            approval: None,
        }
    }

    pub fn agent_approved(fingerprint: impl Into<String>) -> Self {
        Self {
            origin: WriteOrigin::Agent,
            approval: Some(fingerprint.into()),
        }
    }
}

/// Fingerprint of one pending write, stable across retries.
pub fn write_fingerprint(rel: &str, content: &str) -> String {
    crate::hash::fingerprint(rel, content)
}

pub struct KnowledgeStore {
    root: PathBuf,
    index: Arc<SearchIndex>,
    reindex_tx: mpsc::Sender<PathBuf>,
}

impl KnowledgeStore {
    pub fn new(root: PathBuf, index: Arc<SearchIndex>) -> Arc<Self> {
        let (reindex_tx, mut reindex_rx) = mpsc::channel::<PathBuf>(REINDEX_QUEUE_DEPTH);
        let indexer = Arc::clone(&index);
        tokio::spawn(async move {
            while let Some(rel) = reindex_rx.recv().await {
                if rel.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                if let Err(e) = indexer.upsert(&rel).await {
                    log::error!("re-index of {} failed: {e}", rel.display());
                }
            }
        });
        Arc::new(Self {
            root,
            index,
            reindex_tx,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    pub async fn read(&self, rel: &str) -> Result<String> {
        let rel_path = PathBuf::from(rel);
        if !classify(&rel_path).readable() {
            return Err(OlavError::NotPermitted(format!("read of '{rel}'")));
        }
        tokio::fs::read_to_string(self.root.join(&rel_path))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OlavError::not_found(format!("document '{rel}'")),
                _ => e.into(),
            })
    }

    /// Atomic whole-document write under the permission matrix.
    pub async fn write(&self, rel: &str, content: &str, opts: &WriteOptions) -> Result<()> {
        let rel_path = PathBuf::from(rel);
        self.check_write(rel, &rel_path, content, opts)?;
        self.write_unchecked(&rel_path, content).await?;
        // Queue for re-indexing; the bounded channel applies backpressure.
        if self.reindex_tx.send(rel_path).await.is_err() {
            log::warn!("indexer task gone, '{rel}' not re-indexed");
        }
        Ok(())
    }

    /// Append to a document (creating it when missing), atomically.
    pub async fn append(&self, rel: &str, content: &str, opts: &WriteOptions) -> Result<()> {
        let rel_path = PathBuf::from(rel);
        self.check_write(rel, &rel_path, content, opts)?;
        let existing = match self.read(rel).await {
            Ok(text) => text,
            Err(e) if e.kind() == crate::error::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let mut combined = existing;
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(content);
        self.write_unchecked(&rel_path, &combined).await?;
        if self.reindex_tx.send(rel_path).await.is_err() {
            log::warn!("indexer task gone, '{rel}' not re-indexed");
        }
        Ok(())
    }

    /// List readable documents under a directory, optionally filtered by a
    /// glob pattern on the file name.
    pub async fn list(&self, dir: &str, pattern: Option<&str>) -> Result<Vec<String>> {
        let dir_path = PathBuf::from(dir);
        // A directory is listable when a child of it would be readable.
        if !classify(&dir_path.join("probe.md")).readable() {
            return Err(OlavError::NotPermitted(format!("list of '{dir}'")));
        }
        let matcher = pattern
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| OlavError::Internal(format!("bad glob: {e}")))?;

        let abs = self.root.join(&dir_path);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&abs).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if matcher.as_ref().is_none_or(|m| m.matches(&name)) {
                names.push(format!("{}/{name}", dir.trim_end_matches('/')));
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        self.index.search(query, filters, limit).await
    }

    /// Render and store a solution document; on slug collision a numeric
    /// suffix is appended, never overwriting the first.
    ///
    /// The approval gate fingerprints the *input* rather than the rendered
    /// document, so the recorded-at timestamp cannot invalidate a granted
    /// approval between interrupt and resume.
    pub async fn save_solution(
        &self,
        input: &SolutionInput,
        opts: &WriteOptions,
    ) -> Result<String> {
        if opts.origin == WriteOrigin::Agent {
            let payload = serde_json::to_string(input)?;
            let fingerprint = write_fingerprint("knowledge/solutions", &payload);
            if opts.approval.as_deref() != Some(fingerprint.as_str()) {
                return Err(OlavError::NeedsApproval {
                    tool: format!("save_solution '{}'", input.title),
                    fingerprint,
                });
            }
        }

        let markdown = input.render(OffsetDateTime::now_utc());
        let slug = input.slug();

        let mut rel = format!("knowledge/solutions/{slug}.md");
        let mut suffix = 2;
        while tokio::fs::try_exists(self.root.join(&rel)).await? {
            rel = format!("knowledge/solutions/{slug}-{suffix}.md");
            suffix += 1;
        }
        self.write(&rel, &markdown, &WriteOptions::administrative())
            .await?;
        Ok(rel)
    }

    /// Append or replace a row in `knowledge/aliases.md`, keyed by
    /// `(alias, type)`. Gated on a fingerprint of the row itself, since
    /// the surrounding table may change between interrupt and resume.
    pub async fn update_alias(&self, entry: &AliasEntry, opts: &WriteOptions) -> Result<()> {
        let rel = "knowledge/aliases.md";
        if opts.origin == WriteOrigin::Agent {
            let payload = serde_json::to_string(entry)?;
            let fingerprint = write_fingerprint(rel, &payload);
            if opts.approval.as_deref() != Some(fingerprint.as_str()) {
                return Err(OlavError::NeedsApproval {
                    tool: format!("update_alias '{}'", entry.alias),
                    fingerprint,
                });
            }
        }
        let existing = match self.read(rel).await {
            Ok(text) => text,
            Err(e) if e.kind() == crate::error::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let updated = alias::upsert_row(&existing, entry);
        self.write(rel, &updated, &WriteOptions::administrative())
            .await
    }

    /// Parse the current alias table.
    pub async fn aliases(&self) -> Result<Vec<AliasEntry>> {
        match self.read("knowledge/aliases.md").await {
            Ok(text) => Ok(alias::parse_table(&text)),
            Err(e) if e.kind() == crate::error::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn check_write(
        &self,
        rel: &str,
        rel_path: &Path,
        content: &str,
        opts: &WriteOptions,
    ) -> Result<()> {
        match classify(rel_path) {
            Access::ReadWrite => {}
            _ => return Err(OlavError::NotPermitted(format!("write to '{rel}'"))),
        }
        if opts.origin == WriteOrigin::Agent {
            let fingerprint = write_fingerprint(rel, content);
            if opts.approval.as_deref() != Some(fingerprint.as_str()) {
                return Err(OlavError::NeedsApproval {
                    tool: format!("write {rel}"),
                    fingerprint,
                });
            }
        }
        Ok(())
    }

    async fn write_unchecked(&self, rel_path: &Path, content: &str) -> Result<()> {
        let target = self.root.join(rel_path);
        let content = content.to_string();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let parent = target
                .parent()
                .ok_or_else(|| std::io::Error::other("target has no parent"))?;
            std::fs::create_dir_all(parent)?;
            let tmp = parent.join(format!(
                ".{}.tmp-{}",
                target
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "doc".into()),
                uuid::Uuid::new_v4().simple()
            ));
            {
                use std::io::Write;
                let mut file = std::fs::File::create(&tmp)?;
                file.write_all(content.as_bytes())?;
                file.sync_all()?;
            }
            std::fs::rename(&tmp, &target)?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}
