//! Core data models used throughout the retrieval engine.
//!
//! These types represent the documents, chunks, embedding matrices, and
//! search results that flow from extraction through ranking.

use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::error::RetrievalError;

/// Closed set of supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Markdown,
    WordDoc,
    Pdf,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::Markdown,
        DocumentKind::WordDoc,
        DocumentKind::Pdf,
    ];

    /// Resolve a kind from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, RetrievalError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("md") | Some("markdown") => Ok(DocumentKind::Markdown),
            Some("docx") => Ok(DocumentKind::WordDoc),
            Some("pdf") => Ok(DocumentKind::Pdf),
            _ => Err(RetrievalError::UnsupportedKind(path.display().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Markdown => "markdown",
            DocumentKind::WordDoc => "docx",
            DocumentKind::Pdf => "pdf",
        }
    }

    /// Prefix used for chunk locators of this kind (`page-3`, `section-2`).
    pub fn locator_label(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "page",
            DocumentKind::Markdown | DocumentKind::WordDoc => "section",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A corpus document: where it lives and how to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

impl DocumentRef {
    /// Build a reference, resolving the kind from the extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, RetrievalError> {
        let path = path.into();
        let kind = DocumentKind::from_path(&path)?;
        Ok(Self { path, kind })
    }

    /// File name component, used by keyword routing.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// A bounded window of text from one section of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source_path: String,
    /// Coarse section the chunk came from, e.g. `section-3` or `page-2`.
    pub locator: String,
    /// Window index within the section.
    pub local_index: usize,
}

impl Chunk {
    /// `path#locator`, the identifier shown in search results.
    pub fn source(&self) -> String {
        format!("{}#{}", self.source_path, self.locator)
    }
}

/// Staleness signature derived from modification time and byte size.
///
/// This is not a content hash: two different contents that share both
/// mtime and size produce the same etag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Etag {
    pub modified_ns: u128,
    pub size: u64,
}

impl Etag {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let modified_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            modified_ns,
            size: meta.len(),
        }
    }

}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}-{}", self.modified_ns, self.size)
    }
}

/// Row-major `N×D` matrix of f32 embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dims: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn empty(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    /// Pack rows into a matrix. Every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, RetrievalError> {
        let dims = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dims);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dims {
                return Err(RetrievalError::Embedding(format!(
                    "row {} has dimension {}, expected {}",
                    i,
                    row.len(),
                    dims
                )));
            }
            data.extend(row);
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn rows(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dims..(i + 1) * self.dims]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.rows()).map(move |i| self.row(i))
    }
}

/// A fully built per-document index. Row `i` of `embeddings` is the vector
/// for `chunks[i]`; the constructor refuses anything else.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    etag: Etag,
    chunks: Vec<Chunk>,
    embeddings: EmbeddingMatrix,
}

impl IndexedDocument {
    pub fn new(
        etag: Etag,
        chunks: Vec<Chunk>,
        embeddings: EmbeddingMatrix,
    ) -> Result<Self, RetrievalError> {
        if chunks.len() != embeddings.rows() {
            return Err(RetrievalError::Embedding(format!(
                "{} chunks but {} embedding rows",
                chunks.len(),
                embeddings.rows()
            )));
        }
        Ok(Self {
            etag,
            chunks,
            embeddings,
        })
    }

    pub fn etag(&self) -> Etag {
        self.etag
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn embeddings(&self) -> &EmbeddingMatrix {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// A ranked passage returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub source: String,
    pub score: f32,
    pub snippet: String,
}
