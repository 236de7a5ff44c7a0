//! Error taxonomy for the retrieval engine.
//!
//! Per-document failures ([`RetrievalError::FileNotFound`],
//! [`RetrievalError::UnsupportedKind`], [`RetrievalError::ExtractionFailure`],
//! [`RetrievalError::Embedding`]) are isolated by the query engine and end up
//! in the `skipped` debug list. Request validation failures and a missing
//! corpus file at startup are surfaced to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while routing, indexing, or answering a query.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// One or more configured corpus documents do not exist at startup.
    #[error("configured corpus files not found: {}", display_paths(.0))]
    MissingCorpusFile(Vec<PathBuf>),

    /// A requested document path does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file extension does not map to a known document kind, or no
    /// extractor is registered for the kind.
    #[error("unsupported document kind: {0}")]
    UnsupportedKind(String),

    /// The extractor failed to produce text for a document.
    #[error("extraction failed for {}: {message}", path.display())]
    ExtractionFailure { path: PathBuf, message: String },

    /// The embedding provider failed or returned malformed vectors.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The query text is blank after trimming.
    #[error("query must not be empty")]
    EmptyQuery,

    /// `top_k` is not a positive integer.
    #[error("invalid top_k: {0} (expected a positive integer)")]
    InvalidTopK(String),

    /// `scope` is neither `auto` nor `files`.
    #[error("invalid scope: '{0}' (expected 'auto' or 'files')")]
    InvalidScope(String),

    /// `scope = "files"` without any file paths.
    #[error("scope 'files' requires a non-empty 'files' list")]
    MissingFileList,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    /// True for errors caused by a malformed request rather than by the
    /// corpus or a collaborator.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RetrievalError::EmptyQuery
                | RetrievalError::InvalidTopK(_)
                | RetrievalError::InvalidScope(_)
                | RetrievalError::MissingFileList
        )
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_corpus_lists_every_path() {
        let err = RetrievalError::MissingCorpusFile(vec![
            PathBuf::from("docs/a.md"),
            PathBuf::from("docs/b.pdf"),
        ]);
        assert_eq!(
            err.to_string(),
            "configured corpus files not found: docs/a.md, docs/b.pdf"
        );
    }

    #[test]
    fn extraction_failure_names_path() {
        let err = RetrievalError::ExtractionFailure {
            path: PathBuf::from("guide.pdf"),
            message: "bad xref".to_string(),
        };
        assert_eq!(err.to_string(), "extraction failed for guide.pdf: bad xref");
    }

    #[test]
    fn validation_classification() {
        assert!(RetrievalError::EmptyQuery.is_validation());
        assert!(RetrievalError::InvalidTopK("0".into()).is_validation());
        assert!(RetrievalError::MissingFileList.is_validation());
        assert!(!RetrievalError::UnsupportedKind("x.txt".into()).is_validation());
        assert!(!RetrievalError::Embedding("timeout".into()).is_validation());
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: RetrievalError = io_err.into();
        assert!(matches!(err, RetrievalError::Io(_)));
    }
}
