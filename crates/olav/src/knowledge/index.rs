//! Document index: one record per skill/solution/knowledge document,
//! holding the lexical term statistics and, when an embedder is wired,
//! a vector form.

use crate::config::SearchSettings;
use crate::error::Result;
use crate::knowledge::lexical::{Analyzer, TermStats};
use crate::knowledge::vector::{Embedder, Reranker};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Frontmatter weight relative to body terms.
const HEADER_WEIGHT: u32 = 3;
/// Delay before the one background retry after an embedding failure.
const EMBED_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocCategory {
    Skill,
    Solution,
    Alias,
    Note,
}

impl DocCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocCategory::Skill => "skill",
            DocCategory::Solution => "solution",
            DocCategory::Alias => "alias",
            DocCategory::Note => "note",
        }
    }

    fn from_path(rel: &Path) -> Self {
        let parts: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
        match parts.as_slice() {
            ["skills", ..] => DocCategory::Skill,
            ["knowledge", "solutions", ..] => DocCategory::Solution,
            ["knowledge", "aliases.md"] => DocCategory::Alias,
            _ => DocCategory::Note,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocRecord {
    /// Relative path string; doubles as the document id.
    pub doc_id: String,
    pub path: PathBuf,
    pub category: DocCategory,
    pub platform: Option<String>,
    pub tags: Vec<String>,
    pub text: String,
    pub stats: TermStats,
    pub embedding: Option<Vec<f32>>,
}

/// Metadata we care about from any document's frontmatter.
#[derive(Debug, Clone, Default, Deserialize)]
struct DocHeader {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

pub struct SearchIndex {
    root: PathBuf,
    pub(crate) settings: SearchSettings,
    pub(crate) analyzer: Analyzer,
    pub(crate) embedder: Option<Arc<dyn Embedder>>,
    pub(crate) reranker: Option<Arc<dyn Reranker>>,
    docs: RwLock<HashMap<String, Arc<DocRecord>>>,
}

impl SearchIndex {
    pub fn new(
        root: PathBuf,
        settings: SearchSettings,
        embedder: Option<Arc<dyn Embedder>>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        Self {
            root,
            settings,
            analyzer: Analyzer::english(),
            embedder,
            reranker,
            docs: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<DocRecord>> {
        self.docs.read().values().cloned().collect()
    }

    pub fn get(&self, doc_id: &str) -> Option<Arc<DocRecord>> {
        self.docs.read().get(doc_id).cloned()
    }

    /// Index every markdown document under `skills/` and `knowledge/`.
    pub async fn rebuild(self: &Arc<Self>) -> Result<usize> {
        let mut paths = Vec::new();
        for sub in ["skills", "knowledge"] {
            collect_markdown(&self.root.join(sub), &mut paths)?;
        }
        self.docs.write().clear();
        for path in &paths {
            if let Ok(rel) = path.strip_prefix(&self.root) {
                let rel = rel.to_path_buf();
                if let Err(e) = self.upsert(&rel).await {
                    log::error!("indexing {} failed: {e}", rel.display());
                }
            }
        }
        Ok(self.len())
    }

    /// (Re-)index one document by its path relative to the agent root.
    ///
    /// An embedding failure still indexes the document lexically and
    /// queues one background retry.
    pub async fn upsert(self: &Arc<Self>, rel: &Path) -> Result<()> {
        let abs = self.root.join(rel);
        let content = tokio::fs::read_to_string(&abs).await?;
        let doc_id = rel.to_string_lossy().replace('\\', "/");

        let (header, header_text, body) = split_frontmatter(&content);
        let category = header
            .category
            .as_deref()
            .and_then(|c| match c {
                "skill" => Some(DocCategory::Skill),
                "solution" => Some(DocCategory::Solution),
                "alias" => Some(DocCategory::Alias),
                "note" => Some(DocCategory::Note),
                _ => None,
            })
            .unwrap_or_else(|| DocCategory::from_path(rel));

        let body_tokens = self.analyzer.tokens(body);
        let header_tokens = self.analyzer.tokens(&header_text);
        let stats = TermStats::from_tokens(&body_tokens, &header_tokens, HEADER_WEIGHT);

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&[content.clone()]).await {
                Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("embedding {} failed, retrying later: {e}", doc_id);
                    self.queue_embed_retry(rel.to_path_buf());
                    None
                }
            },
            None => None,
        };

        let record = DocRecord {
            doc_id: doc_id.clone(),
            path: abs,
            category,
            platform: header.platform,
            tags: header.tags,
            text: content,
            stats,
            embedding,
        };
        self.docs.write().insert(doc_id, Arc::new(record));
        Ok(())
    }

    pub fn remove(&self, rel: &Path) {
        let doc_id = rel.to_string_lossy().replace('\\', "/");
        self.docs.write().remove(&doc_id);
    }

    fn queue_embed_retry(self: &Arc<Self>, rel: PathBuf) {
        let index = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(EMBED_RETRY_DELAY).await;
            let doc_id = rel.to_string_lossy().replace('\\', "/");
            // Only retry documents that are still indexed.
            if index.get(&doc_id).is_none() {
                return;
            }
            if let Err(e) = index.upsert(&rel).await {
                log::warn!("embed retry for {} failed: {e}", rel.display());
            }
        });
    }
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_markdown(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            paths.push(path);
        }
    }
    paths.sort();
    out.extend(paths);
    Ok(())
}

/// Split a `---` delimited YAML header off a document. Returns the parsed
/// header (defaults on any parse trouble), the raw header text, and the
/// body.
fn split_frontmatter(content: &str) -> (DocHeader, String, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (DocHeader::default(), String::new(), content);
    };
    let Some(end) = rest.find("\n---") else {
        return (DocHeader::default(), String::new(), content);
    };
    let header_text = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n');
    let header = serde_yaml::from_str::<DocHeader>(header_text).unwrap_or_default();
    (header, header_text.to_string(), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_for(dir: &TempDir) -> Arc<SearchIndex> {
        Arc::new(SearchIndex::new(
            dir.path().to_path_buf(),
            SearchSettings::default(),
            None,
            None,
        ))
    }

    fn seed(dir: &TempDir) {
        let solutions = dir.path().join("knowledge").join("solutions");
        std::fs::create_dir_all(&solutions).unwrap();
        std::fs::create_dir_all(dir.path().join("skills")).unwrap();
        std::fs::write(
            solutions.join("ospf-flap.md"),
            "---\ntags: [ospf]\nplatform: cisco_ios\n---\n# OSPF flapping\nNeighbor flapped due to MTU mismatch.\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("skills").join("interface-check.md"),
            "---\nname: Interface Check\ndescription: interface health\n---\nBody\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("knowledge").join("aliases.md"),
            "| alias | type | value |\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn rebuild_indexes_both_roots() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let index = index_for(&dir);
        let count = index.rebuild().await.unwrap();
        assert_eq!(count, 3);

        let record = index.get("knowledge/solutions/ospf-flap.md").unwrap();
        assert_eq!(record.category, DocCategory::Solution);
        assert_eq!(record.platform.as_deref(), Some("cisco_ios"));
        assert_eq!(record.tags, vec!["ospf".to_string()]);

        let record = index.get("skills/interface-check.md").unwrap();
        assert_eq!(record.category, DocCategory::Skill);

        let record = index.get("knowledge/aliases.md").unwrap();
        assert_eq!(record.category, DocCategory::Alias);
    }

    #[tokio::test]
    async fn upsert_replaces_a_record() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let index = index_for(&dir);
        index.rebuild().await.unwrap();

        let rel = PathBuf::from("knowledge/solutions/ospf-flap.md");
        std::fs::write(
            dir.path().join(&rel),
            "---\ntags: [ospf, mtu]\n---\nUpdated text.\n",
        )
        .unwrap();
        index.upsert(&rel).await.unwrap();

        let record = index.get("knowledge/solutions/ospf-flap.md").unwrap();
        assert!(record.text.contains("Updated text"));
        assert_eq!(record.tags.len(), 2);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn remove_drops_a_record() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let index = index_for(&dir);
        index.rebuild().await.unwrap();
        index.remove(&PathBuf::from("knowledge/aliases.md"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn frontmatter_splitting() {
        let (header, header_text, body) =
            split_frontmatter("---\ntags: [a]\n---\nbody here\n");
        assert_eq!(header.tags, vec!["a".to_string()]);
        assert!(header_text.contains("tags"));
        assert_eq!(body, "body here\n");

        let (header, _, body) = split_frontmatter("no header\n");
        assert!(header.tags.is_empty());
        assert_eq!(body, "no header\n");
    }
}
