//! Hybrid retrieval: BM25 and cosine rankings fused with reciprocal rank
//! fusion, then optionally reranked.

use crate::error::Result;
use crate::knowledge::index::{DocCategory, DocRecord, SearchIndex};
use crate::knowledge::lexical;
use crate::knowledge::vector::cosine_similarity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// RRF constant; the usual 60 keeps deep ranks from dominating.
const RRF_K: f64 = 60.0;
/// Characters of document text handed to the reranker per candidate.
const RERANK_SNIPPET_CHARS: usize = 1200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub category: Option<DocCategory>,
    pub platform: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SearchFilters {
    fn matches(&self, record: &DocRecord) -> bool {
        if let Some(category) = self.category {
            if record.category != category {
                return false;
            }
        }
        if let Some(platform) = &self.platform {
            if record.platform.as_deref() != Some(platform.as_str()) {
                return false;
            }
        }
        self.tags.iter().all(|t| record.tags.contains(t))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub path: PathBuf,
    pub score: f64,
    pub snippet: String,
}

impl SearchIndex {
    /// Hybrid search. Never fails because of the reranker; a reranker
    /// error degrades to the fused ranking.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let candidates: Vec<Arc<DocRecord>> = self
            .snapshot()
            .into_iter()
            .filter(|r| filters.matches(r))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let k = self.settings.candidates;
        let mut fused: HashMap<usize, f64> = HashMap::new();

        // Lexical ranking.
        let query_tokens = self.analyzer.tokens(query);
        let stats: Vec<&lexical::TermStats> = candidates.iter().map(|r| &r.stats).collect();
        for (rank, (idx, _score)) in lexical::rank(&query_tokens, &stats, k).iter().enumerate() {
            *fused.entry(*idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }

        // Vector ranking, when an embedder is wired and vectors exist.
        if let Some(embedder) = &self.embedder {
            match embedder.embed(&[query.to_string()]).await {
                Ok(vectors) if !vectors.is_empty() => {
                    let query_vec = &vectors[0];
                    let mut scored: Vec<(usize, f32)> = candidates
                        .iter()
                        .enumerate()
                        .filter_map(|(idx, r)| {
                            r.embedding
                                .as_ref()
                                .map(|e| (idx, cosine_similarity(query_vec, e)))
                        })
                        .filter(|(_, score)| *score > 0.0)
                        .collect();
                    scored.sort_by(|a, b| {
                        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    for (rank, (idx, _)) in scored.into_iter().take(k).enumerate() {
                        *fused.entry(idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("query embedding failed, lexical only: {e}"),
            }
        }

        let mut ranked: Vec<(usize, f64)> = fused.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| candidates[a.0].doc_id.cmp(&candidates[b.0].doc_id))
        });
        let top_n = limit.unwrap_or(self.settings.results);
        ranked.truncate(top_n);

        let mut hits: Vec<SearchHit> = ranked
            .into_iter()
            .map(|(idx, score)| {
                let record = &candidates[idx];
                SearchHit {
                    doc_id: record.doc_id.clone(),
                    path: record.path.clone(),
                    score,
                    snippet: snippet(&record.text, query),
                }
            })
            .collect();

        if let Some(reranker) = &self.reranker {
            let inputs: Vec<(String, String)> = hits
                .iter()
                .map(|h| {
                    let record = candidates
                        .iter()
                        .find(|r| r.doc_id == h.doc_id)
                        .expect("hit came from candidates");
                    let text: String = record.text.chars().take(RERANK_SNIPPET_CHARS).collect();
                    (h.doc_id.clone(), text)
                })
                .collect();
            match reranker.rerank(query, &inputs).await {
                Ok(scores) => {
                    let by_id: HashMap<&str, f64> =
                        scores.iter().map(|(id, s)| (id.as_str(), *s)).collect();
                    hits.sort_by(|a, b| {
                        let sa = by_id.get(a.doc_id.as_str()).copied().unwrap_or(f64::MIN);
                        let sb = by_id.get(b.doc_id.as_str()).copied().unwrap_or(f64::MIN);
                        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    for hit in &mut hits {
                        if let Some(score) = by_id.get(hit.doc_id.as_str()) {
                            hit.score = *score;
                        }
                    }
                    hits.truncate(self.settings.reranked);
                }
                Err(e) => {
                    // The search never fails because of the reranker.
                    log::warn!("reranker failed, returning fused ranking: {e}");
                }
            }
        }

        Ok(hits)
    }
}

/// First line containing a query word, trimmed to a readable width.
fn snippet(text: &str, query: &str) -> String {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect();
    let line = text
        .lines()
        .find(|line| {
            let lower = line.to_lowercase();
            words.iter().any(|w| lower.contains(w))
        })
        .or_else(|| text.lines().find(|l| !l.trim().is_empty()))
        .unwrap_or("");
    let mut snippet: String = line.trim().chars().take(160).collect();
    if line.trim().chars().count() > 160 {
        snippet.push('…');
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchSettings;
    use crate::error::OlavError;
    use crate::knowledge::vector::{Embedder, Reranker};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn seed(dir: &TempDir) {
        let solutions = dir.path().join("knowledge").join("solutions");
        std::fs::create_dir_all(&solutions).unwrap();
        std::fs::write(
            solutions.join("ospf-flap.md"),
            "---\ntags: [ospf]\nplatform: cisco_ios\n---\n# ospf flapping r1 r2\nNeighbor flapping due to MTU mismatch.\n",
        )
        .unwrap();
        std::fs::write(
            solutions.join("bgp-reset.md"),
            "---\ntags: [bgp]\n---\n# bgp session reset\nUpstream reset during maintenance.\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("knowledge").join("mtu-convention.md"),
            "MTU convention: all core links run 9216.\n",
        )
        .unwrap();
    }

    async fn index_with(
        dir: &TempDir,
        embedder: Option<Arc<dyn Embedder>>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Arc<SearchIndex> {
        let index = Arc::new(SearchIndex::new(
            dir.path().to_path_buf(),
            SearchSettings::default(),
            embedder,
            reranker,
        ));
        index.rebuild().await.unwrap();
        index
    }

    #[tokio::test]
    async fn lexical_search_finds_the_solution() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let index = index_with(&dir, None, None).await;

        let hits = index
            .search("ospf flapping", &SearchFilters::default(), None)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].doc_id, "knowledge/solutions/ospf-flap.md");
        assert!(hits[0].score > 0.0);
        assert!(hits[0].snippet.to_lowercase().contains("ospf"));
    }

    #[tokio::test]
    async fn filters_narrow_the_candidates() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let index = index_with(&dir, None, None).await;

        let filters = SearchFilters {
            category: Some(DocCategory::Solution),
            tags: vec!["bgp".to_string()],
            ..SearchFilters::default()
        };
        let hits = index.search("session reset", &filters, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "knowledge/solutions/bgp-reset.md");

        let filters = SearchFilters {
            platform: Some("junos".to_string()),
            ..SearchFilters::default()
        };
        let hits = index.search("ospf", &filters, None).await.unwrap();
        assert!(hits.is_empty());
    }

    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            // Toy two-dimensional space: [mentions mtu, mentions bgp]
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    vec![
                        if lower.contains("mtu") { 1.0 } else { 0.0 },
                        if lower.contains("bgp") { 1.0 } else { 0.0 },
                    ]
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn hybrid_fusion_includes_vector_hits() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let index = index_with(&dir, Some(Arc::new(KeywordEmbedder)), None).await;

        // "mtu" appears lexically in two docs and in the vector space; the
        // convention note should surface even though "jumbo" does not match.
        let hits = index
            .search("mtu jumbo", &SearchFilters::default(), None)
            .await
            .unwrap();
        assert!(
            hits.iter().any(|h| h.doc_id == "knowledge/mtu-convention.md"),
            "vector channel should surface the convention note"
        );
    }

    struct ReverseReranker;

    #[async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(
            &self,
            _query: &str,
            candidates: &[(String, String)],
        ) -> crate::error::Result<Vec<(String, f64)>> {
            Ok(candidates
                .iter()
                .enumerate()
                .map(|(i, (id, _))| (id.clone(), i as f64))
                .collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(
            &self,
            _query: &str,
            _candidates: &[(String, String)],
        ) -> crate::error::Result<Vec<(String, f64)>> {
            Err(OlavError::internal("model unavailable"))
        }
    }

    #[tokio::test]
    async fn reranker_reorders_hits() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let plain = index_with(&dir, None, None).await;
        let baseline = plain
            .search("mtu", &SearchFilters::default(), None)
            .await
            .unwrap();
        assert!(baseline.len() >= 2);

        let reranked_index = index_with(&dir, None, Some(Arc::new(ReverseReranker))).await;
        let reranked = reranked_index
            .search("mtu", &SearchFilters::default(), None)
            .await
            .unwrap();
        // ReverseReranker scores later candidates higher, flipping the order.
        assert_eq!(
            reranked.first().map(|h| h.doc_id.clone()),
            baseline.last().map(|h| h.doc_id.clone())
        );
    }

    #[tokio::test]
    async fn reranker_failure_degrades_gracefully() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let index = index_with(&dir, None, Some(Arc::new(FailingReranker))).await;
        let hits = index
            .search("ospf flapping", &SearchFilters::default(), None)
            .await
            .unwrap();
        assert!(!hits.is_empty(), "search must not fail because of the reranker");
        assert_eq!(hits[0].doc_id, "knowledge/solutions/ospf-flap.md");
    }
}
