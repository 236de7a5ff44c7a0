//! Configuration parsing and validation.
//!
//! The config file is TOML. Every section is optional; an empty file (or no
//! file at all) yields [`Config::default`]. Values can then be overridden
//! from `CRAG_*` environment variables via [`apply_env_overrides`].
//!
//! ```toml
//! [corpus]
//! files = ["docs/guide.md"]
//! root = "docs"
//!
//! [retrieval]
//! top_k = 8
//! threshold = 0.20
//! min_accepted = 0.18
//!
//! [index]
//! max_docs = 5
//! mode = "lazy"
//!
//! [chunking.pdf]
//! tokens = 208
//! overlap = 64
//!
//! [embedding]
//! provider = "hash"
//!
//! [[routing.rules]]
//! keywords = ["table", "seating"]
//! file = "tables_guide.md"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

use crate::chunk::ChunkingParams;
use crate::models::DocumentKind;
use crate::router::RoutingRule;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ Corpus ============

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// Explicit document paths, in corpus order.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Optional directory scanned for additional documents.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.docx".to_string(),
        "**/*.pdf".to_string(),
    ]
}

impl CorpusConfig {
    /// Corpus paths in order: explicit `files` first, then the sorted scan
    /// of `root`. Duplicates keep their first position.
    ///
    /// Explicit files are returned even when they do not exist; the service
    /// reports missing ones together.
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for file in &self.files {
            if !paths.contains(file) {
                paths.push(file.clone());
            }
        }
        if let Some(root) = &self.root {
            for path in self.scan_root(root)? {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }

    fn scan_root(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            bail!("corpus.root does not exist: {}", root.display());
        }

        let include_set = build_globset(&self.include_globs)?;
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(self.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(self.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();
            if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
                continue;
            }
            found.push(path.to_path_buf());
        }
        found.sort();
        Ok(found)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Passages below this score are left out of the composed answer.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// A top score below this marks the response low-confidence.
    #[serde(default = "default_min_accepted")]
    pub min_accepted: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            min_accepted: default_min_accepted(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_threshold() -> f32 {
    0.20
}
fn default_min_accepted() -> f32 {
    0.18
}

// ============ Index ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Index on first query, bounded by `max_docs`.
    #[default]
    Lazy,
    /// Index the whole corpus at startup; no eviction.
    Eager,
}

impl FromStr for IndexMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(IndexMode::Lazy),
            "eager" => Ok(IndexMode::Eager),
            other => bail!("unknown index mode '{}'. Must be lazy or eager.", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_max_docs")]
    pub max_docs: usize,
    #[serde(default)]
    pub mode: IndexMode,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_docs: default_max_docs(),
            mode: IndexMode::Lazy,
        }
    }
}

impl IndexConfig {
    /// Store capacity: `None` (unbounded) in eager mode.
    pub fn capacity(&self) -> Option<usize> {
        match self.mode {
            IndexMode::Lazy => Some(self.max_docs),
            IndexMode::Eager => None,
        }
    }
}

fn default_max_docs() -> usize {
    5
}

// ============ Chunking ============

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ChunkingConfig {
    #[serde(default = "default_markdown_chunking")]
    pub markdown: ChunkingParams,
    #[serde(default = "default_word_chunking")]
    pub word: ChunkingParams,
    #[serde(default = "default_pdf_chunking")]
    pub pdf: ChunkingParams,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            markdown: default_markdown_chunking(),
            word: default_word_chunking(),
            pdf: default_pdf_chunking(),
        }
    }
}

impl ChunkingConfig {
    pub fn for_kind(&self, kind: DocumentKind) -> ChunkingParams {
        match kind {
            DocumentKind::Markdown => self.markdown,
            DocumentKind::WordDoc => self.word,
            DocumentKind::Pdf => self.pdf,
        }
    }
}

fn default_markdown_chunking() -> ChunkingParams {
    ChunkingParams::new(176, 56)
}
fn default_word_chunking() -> ChunkingParams {
    ChunkingParams::new(144, 40)
}
fn default_pdf_chunking() -> ChunkingParams {
    ChunkingParams::new(208, 64)
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

// ============ Routing ============

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_routing_rules")]
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: default_routing_rules(),
        }
    }
}

/// Keyword table for the bundled product guides. Spanish keywords come from
/// the guides themselves; English equivalents are added alongside.
pub fn default_routing_rules() -> Vec<RoutingRule> {
    let rule = |keywords: &[&str], file: &str| {
        RoutingRule::new(keywords.iter().map(|k| k.to_string()).collect(), file)
    };
    vec![
        rule(
            &["orden", "cier", "pago", "propina", "estado", "order", "ticket", "tips"],
            "guia_ordenes_md.md",
        ),
        rule(
            &["mesa", "área", "area", "asign", "table", "seating"],
            "guia_mesas_md.md",
        ),
        rule(
            &["menú", "menu", "categoría", "impuesto", "producto", "category", "tax", "product"],
            "guia_menus_md.md",
        ),
        rule(
            &["beneficio", "visión", "implementación", "ejecutivo", "benefit", "executive"],
            "resumen_ejecutivo_gastrosoft.docx",
        ),
        rule(
            &["práctica", "operación", "estándar", "buenas", "practice", "standard"],
            "buenas_practicas_gastrosoft.pdf",
        ),
    ]
}

// ============ Server ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

// ============ Loading ============

/// Load configuration from `path` (or defaults when `None`), apply
/// `CRAG_*` environment overrides, and validate.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_config(&content)?
        }
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Apply `CRAG_*` overrides. `lookup` is `std::env::var` in production and a
/// map in tests.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env_parse::<usize, _>(&lookup, "CRAG_TOP_K")? {
        config.retrieval.top_k = v;
    }
    if let Some(v) = env_parse::<f32, _>(&lookup, "CRAG_THRESHOLD")? {
        config.retrieval.threshold = v;
    }
    if let Some(v) = env_parse::<f32, _>(&lookup, "CRAG_MIN_ACCEPTED")? {
        config.retrieval.min_accepted = v;
    }
    if let Some(v) = env_parse::<usize, _>(&lookup, "CRAG_MAX_DOCS")? {
        config.index.max_docs = v;
    }
    if let Some(v) = env_parse::<IndexMode, _>(&lookup, "CRAG_INDEX_MODE")? {
        config.index.mode = v;
    }
    if let Some(raw) = lookup("CRAG_FILES") {
        config.corpus.files = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
    }

    let chunking = &mut config.chunking;
    for (prefix, params) in [
        ("CRAG_MD", &mut chunking.markdown),
        ("CRAG_DOCX", &mut chunking.word),
        ("CRAG_PDF", &mut chunking.pdf),
    ] {
        if let Some(v) = env_parse::<usize, _>(&lookup, &format!("{}_CHUNK_TOKENS", prefix))? {
            params.tokens = v;
        }
        if let Some(v) = env_parse::<usize, _>(&lookup, &format!("{}_OVERLAP_TOKENS", prefix))? {
            params.overlap = v;
        }
    }

    if let Some(v) = lookup("CRAG_EMBEDDING_PROVIDER") {
        config.embedding.provider = v.trim().to_string();
    }
    if let Some(v) = lookup("CRAG_EMBEDDING_MODEL") {
        config.embedding.model = Some(v.trim().to_string());
    }
    Ok(())
}

fn env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", key, raw, e)),
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.threshold) {
        bail!("retrieval.threshold must be in [-1.0, 1.0]");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_accepted) {
        bail!("retrieval.min_accepted must be in [-1.0, 1.0]");
    }

    // Eviction drops to max_docs - 2, which must leave room for a document.
    if config.index.max_docs < 3 {
        bail!("index.max_docs must be >= 3");
    }

    for (name, params) in [
        ("markdown", config.chunking.markdown),
        ("word", config.chunking.word),
        ("pdf", config.chunking.pdf),
    ] {
        if params.tokens == 0 {
            bail!("chunking.{}.tokens must be > 0", name);
        }
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    for rule in &config.routing.rules {
        if rule.file.trim().is_empty() {
            bail!("routing rule has an empty file name");
        }
    }

    Ok(())
}
