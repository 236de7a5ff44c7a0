//! Per-document index cache.
//!
//! [`IndexStore`] maps canonical document paths to immutable
//! [`IndexedDocument`]s. An entry is reused while the file's [`Etag`] is
//! unchanged and rebuilt otherwise. In bounded mode the store keeps a
//! recency list and evicts least-recently-used entries once it grows past
//! capacity.
//!
//! # Concurrency
//!
//! - The index map and recency list live behind one `std::sync::Mutex`,
//!   held only for map updates and never across an `.await`.
//! - Builds are single-flight per path: concurrent callers for the same
//!   stale path wait on a per-path gate, and all but the first find a fresh
//!   entry when they get through.
//! - Entries are handed out as `Arc<IndexedDocument>`, so an evicted or
//!   replaced document stays valid for readers already holding it.
//! - A build that is dropped mid-way publishes nothing.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;

use crate::chunk::chunk_sections;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::extract::{ExtractorTable, TextExtractor};
use crate::models::{DocumentKind, DocumentRef, EmbeddingMatrix, Etag, IndexedDocument};

/// Cache counters since the store was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub hits: u64,
    pub builds: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct StoreState {
    indices: HashMap<PathBuf, Arc<IndexedDocument>>,
    /// Least recently used at the front.
    recency: VecDeque<PathBuf>,
}

impl StoreState {
    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.recency.iter().position(|p| p == path) {
            self.recency.remove(pos);
        }
        self.recency.push_back(path.to_path_buf());
    }
}

type Gate = Arc<tokio::sync::Mutex<()>>;

pub struct IndexStore {
    provider: Arc<dyn EmbeddingProvider>,
    extractors: ExtractorTable,
    chunking: ChunkingConfig,
    batch_size: usize,
    capacity: Option<usize>,
    state: Mutex<StoreState>,
    inflight: Mutex<HashMap<PathBuf, Gate>>,
    hits: AtomicU64,
    builds: AtomicU64,
    evictions: AtomicU64,
}

impl IndexStore {
    /// `capacity` of `None` disables eviction.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        extractors: ExtractorTable,
        chunking: ChunkingConfig,
        batch_size: usize,
        capacity: Option<usize>,
    ) -> Self {
        Self {
            provider,
            extractors,
            chunking,
            batch_size: batch_size.max(1),
            capacity,
            state: Mutex::new(StoreState::default()),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Return a fresh index for `doc`, building it if missing or stale.
    pub async fn ensure_indexed(
        &self,
        doc: &DocumentRef,
    ) -> Result<Arc<IndexedDocument>, RetrievalError> {
        let path = tokio::fs::canonicalize(&doc.path)
            .await
            .map_err(|_| RetrievalError::FileNotFound(doc.path.clone()))?;
        let etag = current_etag(&path).await?;

        if let Some(hit) = self.fresh(&path, etag) {
            tracing::debug!(path = %path.display(), "index cache hit");
            return Ok(hit);
        }

        let extractor = self
            .extractors
            .get(doc.kind)
            .ok_or_else(|| RetrievalError::UnsupportedKind(doc.kind.to_string()))?;

        let slot = self.acquire_slot(&path);
        let _guard = slot.gate.lock().await;

        // Another caller may have finished a build while we waited.
        let etag = current_etag(&path).await?;
        if let Some(hit) = self.fresh(&path, etag) {
            tracing::debug!(path = %path.display(), "index built by concurrent caller");
            return Ok(hit);
        }

        let started = Instant::now();
        let built = Arc::new(self.build(&path, doc.kind, etag, extractor).await?);
        tracing::info!(
            path = %path.display(),
            kind = %doc.kind,
            chunks = built.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexed document"
        );

        self.publish(path, built.clone());
        self.builds.fetch_add(1, Ordering::Relaxed);
        Ok(built)
    }

    pub fn contains(&self, path: &Path) -> bool {
        let key = canonical_or_same(path);
        self.lock_state().indices.contains_key(&key)
    }

    /// Indexed paths, least recently used first.
    pub fn indexed_paths(&self) -> Vec<PathBuf> {
        self.lock_state().recency.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_state().indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fresh(&self, path: &Path, etag: Etag) -> Option<Arc<IndexedDocument>> {
        let mut state = self.lock_state();
        let doc = state
            .indices
            .get(path)
            .filter(|d| d.etag() == etag)
            .cloned()?;
        state.touch(path);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(doc)
    }

    fn acquire_slot(&self, path: &Path) -> GateSlot<'_> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let gate = inflight
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        GateSlot {
            store: self,
            path: path.to_path_buf(),
            gate,
        }
    }

    async fn build(
        &self,
        path: &Path,
        kind: DocumentKind,
        etag: Etag,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<IndexedDocument, RetrievalError> {
        let src = path.to_path_buf();
        let sections = tokio::task::spawn_blocking(move || {
            let text = extractor.extract_text(&src)?;
            Ok::<_, crate::extract::ExtractError>(extractor.presection(&text))
        })
        .await
        .map_err(|e| extraction_failure(path, e))?
        .map_err(|e| extraction_failure(path, e))?;

        let source_path = path.display().to_string();
        let chunks = chunk_sections(
            &source_path,
            &sections,
            self.chunking.for_kind(kind),
            kind.locator_label(),
        );

        let mut rows = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .provider
                .embed_batch(&texts)
                .await
                .map_err(|e| RetrievalError::Embedding(format!("{:#}", e)))?;
            if vectors.len() != texts.len() {
                return Err(RetrievalError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            rows.extend(vectors);
        }

        let embeddings = if rows.is_empty() {
            EmbeddingMatrix::empty(self.provider.dims())
        } else {
            EmbeddingMatrix::from_rows(rows)?
        };
        IndexedDocument::new(etag, chunks, embeddings)
    }

    fn publish(&self, path: PathBuf, doc: Arc<IndexedDocument>) {
        let mut state = self.lock_state();
        state.indices.insert(path.clone(), doc);
        state.touch(&path);

        let Some(capacity) = self.capacity else {
            return;
        };
        if state.indices.len() <= capacity {
            return;
        }
        let keep = capacity.saturating_sub(2);
        while state.indices.len() > keep {
            let Some(oldest) = state.recency.pop_front() else {
                break;
            };
            if state.indices.remove(&oldest).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(path = %oldest.display(), "evicted index");
            }
        }
    }
}

/// Holds a reference to a per-path gate. The gate is removed from the
/// in-flight map when its last holder drops, including on cancellation.
struct GateSlot<'a> {
    store: &'a IndexStore,
    path: PathBuf,
    gate: Gate,
}

impl Drop for GateSlot<'_> {
    fn drop(&mut self) {
        let mut inflight = self
            .store
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let last_holder = inflight
            .get(&self.path)
            .is_some_and(|g| Arc::ptr_eq(g, &self.gate) && Arc::strong_count(&self.gate) <= 2);
        if last_holder {
            inflight.remove(&self.path);
        }
    }
}

async fn current_etag(path: &Path) -> Result<Etag, RetrievalError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Etag::from_metadata(&meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RetrievalError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(RetrievalError::Io(e)),
    }
}

fn extraction_failure(path: &Path, e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::ExtractionFailure {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn canonical_or_same(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
