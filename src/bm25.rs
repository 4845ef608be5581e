//! BM25Index (C5, §4.4): tokenised corpus + Okapi BM25 ranking, persisted to
//! Redis. Tokeniser and stop-word list are ported from
//! `original_source/.../bm25_index_service.py::BM25Tokenizer`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use redis::AsyncCommands;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;

const K1: f64 = 1.5;
const B: f64 = 0.75;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

static STOP_WORDS: Lazy<std::collections::HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "will", "with", "this", "but",
        "they", "have", "had", "were", "been", "being", "or", "not", "can", "could", "would",
        "should", "may", "might", "must", "shall", "do", "does", "did",
    ]
    .into_iter()
    .collect()
});

pub struct Tokenizer {
    use_stemming: bool,
    stemmer: Stemmer,
}

impl Tokenizer {
    pub fn new(use_stemming: bool) -> Self {
        Self {
            use_stemming,
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let lower = text.to_lowercase();
        let mut tokens: Vec<String> = WORD_RE
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .filter(|t| !STOP_WORDS.contains(t.as_str()))
            .collect();
        if self.use_stemming {
            tokens = tokens
                .into_iter()
                .map(|t| self.stemmer.stem(&t).into_owned())
                .collect();
        }
        tokens.retain(|t| t.len() > 1);
        tokens
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Corpus {
    corpus: Vec<Vec<String>>,
    doc_ids: Vec<String>,
}

/// In-memory BM25 corpus guarded by a single-writer lock (§5: "single-writer,
/// readers observe a consistent snapshot").
pub struct Bm25Index {
    state: RwLock<Corpus>,
    tokenizer: Tokenizer,
    redis_url: Option<String>,
    key_prefix: String,
}

impl Bm25Index {
    pub fn new(redis_url: impl Into<String>, use_stemming: bool) -> Self {
        Self {
            state: RwLock::new(Corpus::default()),
            tokenizer: Tokenizer::new(use_stemming),
            redis_url: Some(redis_url.into()),
            key_prefix: "archive:bm25".to_string(),
        }
    }

    /// Pure in-memory index with persistence disabled, for unit/component
    /// tests that should not require a live Redis.
    pub fn in_memory(use_stemming: bool) -> Self {
        Self {
            state: RwLock::new(Corpus::default()),
            tokenizer: Tokenizer::new(use_stemming),
            redis_url: None,
            key_prefix: "archive:bm25".to_string(),
        }
    }

    async fn conn(&self) -> Result<Option<redis::aio::MultiplexedConnection>> {
        let Some(url) = &self.redis_url else {
            return Ok(None);
        };
        let client = redis::Client::open(url.as_str())?;
        Ok(Some(client.get_multiplexed_async_connection().await?))
    }

    /// Deserialize corpus + ids from Redis and rebuild in-memory state
    /// (§4.4: "on startup, deserialise and rebuild BM25"). No-op when
    /// persistence is disabled.
    pub async fn load(&self) -> Result<()> {
        let Some(mut conn) = self.conn().await? else {
            return Ok(());
        };
        let corpus_raw: Option<String> = conn.get(format!("{}:corpus", self.key_prefix)).await?;
        let doc_ids_raw: Option<String> = conn.get(format!("{}:doc_ids", self.key_prefix)).await?;

        let corpus: Vec<Vec<String>> = corpus_raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let doc_ids: Vec<String> = doc_ids_raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        info!(documents = doc_ids.len(), "BM25 index loaded from Redis");
        *self.state.write().await = Corpus { corpus, doc_ids };
        Ok(())
    }

    async fn persist(&self, state: &Corpus) -> Result<()> {
        let Some(mut conn) = self.conn().await? else {
            return Ok(());
        };
        let corpus_json = serde_json::to_string(&state.corpus)?;
        let doc_ids_json = serde_json::to_string(&state.doc_ids)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(format!("{}:corpus", self.key_prefix), corpus_json).ignore();
        pipe.set(format!("{}:doc_ids", self.key_prefix), doc_ids_json).ignore();
        pipe.set(format!("{}:count", self.key_prefix), state.doc_ids.len()).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Add or replace a document's token list, keeping corpus/doc_ids aligned
    /// (I4). Adding an empty-token document is permitted, per spec.
    pub async fn add(&self, document_id: &str, text: &str) -> Result<()> {
        let tokens = self.tokenizer.tokenize(text);
        if tokens.is_empty() {
            warn!(document_id, "indexing document with zero BM25 tokens");
        }
        let mut state = self.state.write().await;
        if let Some(pos) = state.doc_ids.iter().position(|id| id == document_id) {
            state.corpus[pos] = tokens;
        } else {
            state.doc_ids.push(document_id.to_string());
            state.corpus.push(tokens);
        }
        self.persist(&state).await
    }

    pub async fn remove(&self, document_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(pos) = state.doc_ids.iter().position(|id| id == document_id) {
            state.doc_ids.remove(pos);
            state.corpus.remove(pos);
        }
        self.persist(&state).await
    }

    pub async fn document_ids(&self) -> Vec<String> {
        self.state.read().await.doc_ids.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.doc_ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove corpus entries whose document id the tracker no longer knows
    /// about (Open Question 1: reconcile sweep on startup).
    pub async fn reconcile(&self, known_ids: &std::collections::HashSet<String>) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.doc_ids.len();
        let mut kept_ids = Vec::with_capacity(before);
        let mut kept_corpus = Vec::with_capacity(before);
        for (id, tokens) in state.doc_ids.drain(..).zip(state.corpus.drain(..)) {
            if known_ids.contains(&id) {
                kept_ids.push(id);
                kept_corpus.push(tokens);
            }
        }
        let removed = before - kept_ids.len();
        state.doc_ids = kept_ids;
        state.corpus = kept_corpus;
        if removed > 0 {
            info!(removed, "reconciled BM25 orphans with no tracker row");
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    /// Okapi BM25 (k1=1.5, b=0.75). `search` tokenises the query, scores
    /// against the whole corpus, filters by `min_score`, sorts descending
    /// (ties broken by insertion order), and truncates to `top_k`.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f64) -> Vec<(String, f64)> {
        let query_tokens = self.tokenizer.tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let state = self.state.read().await;
        let n = state.corpus.len();
        if n == 0 {
            return Vec::new();
        }

        let doc_lens: Vec<usize> = state.corpus.iter().map(|d| d.len()).collect();
        let avg_len: f64 = doc_lens.iter().sum::<usize>() as f64 / n as f64;

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &state.corpus {
            let unique: std::collections::HashSet<&str> = doc.iter().map(|s| s.as_str()).collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        let idf = |term: &str| -> f64 {
            let df = *doc_freq.get(term).unwrap_or(&0) as f64;
            ((n as f64 - df + 0.5) / (df + 0.5) + 1.0).ln()
        };

        let mut scored: Vec<(usize, f64)> = Vec::with_capacity(n);
        for (doc_idx, doc) in state.corpus.iter().enumerate() {
            let mut term_freq: HashMap<&str, usize> = HashMap::new();
            for term in doc {
                *term_freq.entry(term.as_str()).or_insert(0) += 1;
            }
            let doc_len = doc_lens[doc_idx] as f64;
            let mut score = 0.0;
            for term in &query_tokens {
                let tf = *term_freq.get(term.as_str()).unwrap_or(&0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let numerator = tf * (K1 + 1.0);
                let denominator = tf + K1 * (1.0 - B + B * (doc_len / avg_len));
                score += idf(term) * numerator / denominator;
            }
            if score >= min_score {
                scored.push((doc_idx, score));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored
            .into_iter()
            .take(top_k)
            .map(|(idx, score)| (state.doc_ids[idx].clone(), score))
            .collect()
    }
}
