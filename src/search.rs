//! Query execution over a set of candidate documents.
//!
//! # Scoring
//!
//! 1. The query is embedded once; failure here fails the whole query.
//! 2. Candidates are indexed concurrently. A candidate that cannot be
//!    indexed is recorded in `skipped` and the rest continue.
//! 3. Every chunk is scored by cosine similarity against the query.
//! 4. Each document contributes its local top
//!    `k_local = max(3, min(chunks, ceil(top_k / n) * 2))` chunks, so no
//!    single long document crowds the others out before the global cut.
//! 5. Local results are concatenated in candidate order, stable-sorted by
//!    descending score, and truncated to `top_k`.
//!
//! A result set is low-confidence when it is empty or its best score is
//! below `min_accepted`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::models::{DocumentRef, IndexedDocument, SearchResult};
use crate::store::IndexStore;

/// Ranked results plus per-candidate indexing outcome.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub low_confidence: bool,
    /// Candidate paths that were indexed (or served from cache).
    pub indexed: Vec<String>,
    /// `"<path>: <error>"` for candidates that failed.
    pub skipped: Vec<String>,
}

pub struct QueryEngine {
    store: Arc<IndexStore>,
    provider: Arc<dyn EmbeddingProvider>,
    min_accepted: f32,
}

impl QueryEngine {
    pub fn new(
        store: Arc<IndexStore>,
        provider: Arc<dyn EmbeddingProvider>,
        min_accepted: f32,
    ) -> Self {
        Self {
            store,
            provider,
            min_accepted,
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub async fn search(
        &self,
        query: &str,
        candidates: &[DocumentRef],
        top_k: usize,
    ) -> Result<SearchOutcome, RetrievalError> {
        let top_k = top_k.max(1);
        let query_vec = self
            .provider
            .embed_query(query)
            .await
            .map_err(|e| RetrievalError::Embedding(format!("{:#}", e)))?;

        let mut outcome = SearchOutcome::default();
        let k_local = local_k(top_k, candidates.len());
        let mut pooled: Vec<SearchResult> = Vec::new();

        for (doc, result) in candidates.iter().zip(self.index_all(candidates).await) {
            let label = doc.path.display().to_string();
            let indexed = result.and_then(|indexed| {
                check_dims(&indexed, query_vec.len())?;
                Ok(indexed)
            });
            match indexed {
                Ok(indexed) => {
                    pooled.extend(top_chunks(&indexed, &query_vec, k_local));
                    outcome.indexed.push(label);
                }
                Err(e) => {
                    tracing::warn!(path = %label, error = %e, "skipping candidate");
                    outcome.skipped.push(format!("{}: {}", label, e));
                }
            }
        }

        pooled.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        pooled.truncate(top_k);

        outcome.low_confidence = pooled
            .first()
            .map(|top| top.score < self.min_accepted)
            .unwrap_or(true);
        outcome.results = pooled;
        Ok(outcome)
    }

    /// Index every candidate on its own task; results come back in
    /// candidate order.
    async fn index_all(
        &self,
        candidates: &[DocumentRef],
    ) -> Vec<Result<Arc<IndexedDocument>, RetrievalError>> {
        let handles: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|doc| {
                let store = self.store.clone();
                tokio::spawn(async move { store.ensure_indexed(&doc).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (doc, handle) in candidates.iter().zip(handles) {
            results.push(match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(RetrievalError::ExtractionFailure {
                    path: doc.path.clone(),
                    message: format!("indexing task failed: {}", join_err),
                }),
            });
        }
        results
    }
}

fn local_k(top_k: usize, candidates: usize) -> usize {
    let per_doc = top_k.div_ceil(candidates.max(1));
    per_doc.saturating_mul(2).max(3)
}

fn check_dims(doc: &IndexedDocument, query_dims: usize) -> Result<(), RetrievalError> {
    let dims = doc.embeddings().dims();
    if !doc.is_empty() && dims != query_dims {
        return Err(RetrievalError::Embedding(format!(
            "index has dimension {}, query has {}",
            dims, query_dims
        )));
    }
    Ok(())
}

/// Best `k` chunks of one document, ties keeping chunk order.
fn top_chunks(doc: &IndexedDocument, query: &[f32], k: usize) -> Vec<SearchResult> {
    let mut scored: Vec<(usize, f32)> = doc
        .embeddings()
        .iter_rows()
        .map(|row| cosine_similarity(row, query))
        .enumerate()
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k.min(doc.len()));

    scored
        .into_iter()
        .map(|(i, score)| {
            let chunk = &doc.chunks()[i];
            SearchResult {
                source: chunk.source(),
                score,
                snippet: chunk.text.clone(),
            }
        })
        .collect()
}
