//! Lexical analysis and BM25 ranking.
//!
//! Tokens are lowercased, split on non-alphanumerics, stopword-filtered
//! and stemmed. The header block of a document is tokenized with extra
//! weight at index time, which is how frontmatter acts as a boost field.

use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{HashMap, HashSet};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

pub struct Analyzer {
    stemmer: Stemmer,
    stopwords: HashSet<String>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::english()
    }
}

impl Analyzer {
    pub fn english() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            stopwords: stop_words::get(stop_words::LANGUAGE::English)
                .into_iter()
                .collect(),
        }
    }

    pub fn tokens(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .map(|w| w.to_lowercase())
            .filter(|w| !self.stopwords.contains(w))
            .map(|w| self.stemmer.stem(&w).to_string())
            .collect()
    }
}

/// Term statistics of one indexed document.
#[derive(Debug, Clone, Default)]
pub struct TermStats {
    pub frequencies: HashMap<String, u32>,
    pub length: u32,
}

impl TermStats {
    /// Header tokens are counted `weight` times.
    pub fn from_tokens(body: &[String], header: &[String], header_weight: u32) -> Self {
        let mut stats = TermStats::default();
        for token in body {
            *stats.frequencies.entry(token.clone()).or_insert(0) += 1;
            stats.length += 1;
        }
        for token in header {
            *stats.frequencies.entry(token.clone()).or_insert(0) += header_weight;
            stats.length += header_weight;
        }
        stats
    }
}

/// BM25 over a document snapshot; returns `(index, score)` for the top-k
/// documents with a positive score, best first.
pub fn rank(query_tokens: &[String], docs: &[&TermStats], k: usize) -> Vec<(usize, f64)> {
    if docs.is_empty() || query_tokens.is_empty() {
        return Vec::new();
    }
    let n = docs.len() as f64;
    let avg_len = docs.iter().map(|d| d.length as f64).sum::<f64>() / n;
    let avg_len = avg_len.max(1.0);

    let mut unique_terms: Vec<&String> = query_tokens.iter().collect();
    unique_terms.sort();
    unique_terms.dedup();

    let mut scores: Vec<(usize, f64)> = Vec::new();
    for (idx, stats) in docs.iter().enumerate() {
        let mut score = 0.0;
        for term in &unique_terms {
            let tf = stats.frequencies.get(*term).copied().unwrap_or(0) as f64;
            if tf == 0.0 {
                continue;
            }
            let df = docs
                .iter()
                .filter(|d| d.frequencies.contains_key(*term))
                .count() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * stats.length as f64 / avg_len);
            score += idf * tf * (BM25_K1 + 1.0) / denom;
        }
        if score > 0.0 {
            scores.push((idx, score));
        }
    }
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scores.truncate(k);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_stems_and_filters() {
        let analyzer = Analyzer::english();
        let tokens = analyzer.tokens("The interfaces are flapping on R1!");
        // "the"/"are"/"on" are stopwords, the rest is stemmed
        assert!(tokens.contains(&"interfac".to_string()));
        assert!(tokens.contains(&"flap".to_string()));
        assert!(tokens.contains(&"r1".to_string()));
        assert!(!tokens.iter().any(|t| t == "the" || t == "are"));
    }

    fn stats(analyzer: &Analyzer, text: &str) -> TermStats {
        TermStats::from_tokens(&analyzer.tokens(text), &[], 1)
    }

    #[test]
    fn rank_prefers_matching_documents() {
        let analyzer = Analyzer::english();
        let a = stats(&analyzer, "ospf neighbor flapping between r1 and r2");
        let b = stats(&analyzer, "bgp session established with upstream");
        let c = stats(&analyzer, "ospf adjacency troubleshooting notes ospf timers");
        let docs = vec![&a, &b, &c];

        let query = analyzer.tokens("ospf flapping");
        let ranked = rank(&query, &docs, 10);
        assert_eq!(ranked.len(), 2);
        // document a matches both terms and outranks c
        assert_eq!(ranked[0].0, 0);
        assert_eq!(ranked[1].0, 2);
    }

    #[test]
    fn header_boost_lifts_a_document() {
        let analyzer = Analyzer::english();
        let body = analyzer.tokens("generic troubleshooting body text");
        let header = analyzer.tokens("ospf flapping");
        let boosted = TermStats::from_tokens(&body, &header, 3);
        let plain = stats(&analyzer, "ospf mention generic troubleshooting body text");
        let docs = vec![&plain, &boosted];

        let query = analyzer.tokens("ospf flapping");
        let ranked = rank(&query, &docs, 10);
        assert_eq!(ranked[0].0, 1, "header-boosted doc should rank first");
    }

    #[test]
    fn empty_query_returns_nothing() {
        let analyzer = Analyzer::english();
        let a = stats(&analyzer, "content");
        let docs = vec![&a];
        assert!(rank(&[], &docs, 10).is_empty());
    }
}
