//! Request-level facade shared by the CLI and the HTTP server.
//!
//! [`RetrievalService`] owns the router, the index store, the query engine
//! and the answer composer. It validates a [`QueryRequest`], routes it to
//! candidate documents, searches them and assembles a [`QueryResponse`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::answer::AnswerComposer;
use crate::config::{Config, IndexMode};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::extract::ExtractorTable;
use crate::models::{DocumentRef, SearchResult};
use crate::router::{Router, Scope};
use crate::search::QueryEngine;
use crate::store::IndexStore;

/// Incoming query, as accepted by `POST /query` and the `query` command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    /// Kept loose so `0`, `-3` or `"five"` become a validation error rather
    /// than a deserialization failure.
    #[serde(default)]
    pub top_k: Option<serde_json::Value>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub best_answer: String,
    pub low_confidence: bool,
    pub results: Vec<SearchResult>,
    pub debug: DebugInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub indexed: Vec<String>,
    pub skipped: Vec<String>,
    pub timings_ms: Timings,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timings {
    pub total_ms: u64,
}

/// Outcome of indexing the whole corpus.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmReport {
    /// `(path, chunk count)` per indexed document.
    pub indexed: Vec<(String, usize)>,
    pub skipped: Vec<String>,
}

struct ValidRequest {
    query: String,
    scope: Scope,
    files: Vec<String>,
    top_k: usize,
}

pub struct RetrievalService {
    config: Config,
    router: Router,
    engine: QueryEngine,
    composer: AnswerComposer,
}

impl RetrievalService {
    /// Build the service from configuration.
    ///
    /// Fails if any configured corpus file is missing (all missing paths
    /// are reported together) or has an unsupported extension. In eager
    /// mode the whole corpus is indexed before returning.
    pub async fn from_config(config: Config) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        let service = Self::with_provider(config, provider, ExtractorTable::with_builtins())?;
        if service.config.index.mode == IndexMode::Eager {
            let report = service.warm().await;
            tracing::info!(
                indexed = report.indexed.len(),
                skipped = report.skipped.len(),
                "eager indexing finished"
            );
        }
        Ok(service)
    }

    /// Build the service with an explicit provider and extractor table.
    pub fn with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        extractors: ExtractorTable,
    ) -> Result<Self> {
        let corpus = resolve_corpus(&config)?;
        let store = Arc::new(IndexStore::new(
            provider.clone(),
            extractors,
            config.chunking,
            config.embedding.batch_size,
            config.index.capacity(),
        ));
        let engine = QueryEngine::new(store, provider, config.retrieval.min_accepted);
        let router = Router::new(corpus, config.routing.rules.clone());

        tracing::debug!(
            documents = router.corpus().len(),
            model = engine.store().provider().model_name(),
            "retrieval service ready"
        );

        Ok(Self {
            config,
            router,
            engine,
            composer: AnswerComposer::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn corpus(&self) -> &[DocumentRef] {
        self.router.corpus()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        self.engine.store()
    }

    pub fn model_name(&self) -> &str {
        self.engine.store().provider().model_name()
    }

    pub async fn run(&self, request: QueryRequest) -> Result<QueryResponse, RetrievalError> {
        let started = Instant::now();
        let request = self.validate(request)?;

        let route = self
            .router
            .route(&request.query, request.scope, &request.files);
        let mut outcome = self
            .engine
            .search(&request.query, &route.candidates, request.top_k)
            .await?;

        for (path, err) in route.rejected {
            outcome.skipped.push(format!("{}: {}", path, err));
        }

        let best_answer = self
            .composer
            .compose(&answer_passages(&outcome.results, self.config.retrieval.threshold));

        let total_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            candidates = route.candidates.len(),
            results = outcome.results.len(),
            low_confidence = outcome.low_confidence,
            total_ms,
            "query answered"
        );

        Ok(QueryResponse {
            best_answer,
            low_confidence: outcome.low_confidence,
            results: outcome.results,
            debug: DebugInfo {
                indexed: outcome.indexed,
                skipped: outcome.skipped,
                timings_ms: Timings { total_ms },
            },
        })
    }

    /// Index every corpus document. Failures are reported, not returned.
    pub async fn warm(&self) -> WarmReport {
        let mut report = WarmReport::default();
        for doc in self.router.corpus() {
            let label = doc.path.display().to_string();
            match self.store().ensure_indexed(doc).await {
                Ok(indexed) => report.indexed.push((label, indexed.len())),
                Err(e) => {
                    tracing::warn!(path = %label, error = %e, "failed to index document");
                    report.skipped.push(format!("{}: {}", label, e));
                }
            }
        }
        report
    }

    fn validate(&self, request: QueryRequest) -> Result<ValidRequest, RetrievalError> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let scope = match request.scope.as_deref() {
            None => Scope::Auto,
            Some(raw) => raw.parse::<Scope>()?,
        };

        let files = request.files.unwrap_or_default();
        if scope == Scope::Files && files.iter().all(|f| f.trim().is_empty()) {
            return Err(RetrievalError::MissingFileList);
        }

        let top_k = match request.top_k {
            None | Some(serde_json::Value::Null) => self.config.retrieval.top_k,
            Some(value) => parse_top_k(&value)?,
        };

        Ok(ValidRequest {
            query,
            scope,
            files,
            top_k,
        })
    }
}

/// Passages scoring at least `threshold`, or every result when none does.
fn answer_passages(results: &[SearchResult], threshold: f32) -> Vec<SearchResult> {
    let above: Vec<SearchResult> = results
        .iter()
        .filter(|r| r.score >= threshold)
        .cloned()
        .collect();
    if above.is_empty() {
        results.to_vec()
    } else {
        above
    }
}

fn parse_top_k(value: &serde_json::Value) -> Result<usize, RetrievalError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n >= 1 => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
        _ => Err(RetrievalError::InvalidTopK(value.to_string())),
    }
}

/// Resolve configured corpus paths into document references, failing on
/// missing files or unsupported extensions.
fn resolve_corpus(config: &Config) -> Result<Vec<DocumentRef>> {
    let paths = config.corpus.resolve()?;

    let missing: Vec<PathBuf> = paths.iter().filter(|p| !p.exists()).cloned().collect();
    if !missing.is_empty() {
        return Err(RetrievalError::MissingCorpusFile(missing).into());
    }

    let mut corpus = Vec::with_capacity(paths.len());
    for path in paths {
        let doc = DocumentRef::from_path(path.clone())
            .with_context(|| {
                format!("corpus file {} has an unsupported extension", path.display())
            })?;
        corpus.push(doc);
    }

    if corpus.is_empty() {
        tracing::warn!("corpus is empty; every query will be low-confidence");
    }
    if !config.embedding.is_enabled() {
        tracing::warn!("embedding provider is disabled; queries will fail until one is configured");
    }
    Ok(corpus)
}
