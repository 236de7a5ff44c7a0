//! Candidate selection for a query.
//!
//! With [`Scope::Files`] the caller names the documents; with
//! [`Scope::Auto`] an ordered keyword table picks documents by file name,
//! falling back to the whole corpus when no keyword matches.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::RetrievalError;
use crate::models::DocumentRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Auto,
    Files,
}

impl FromStr for Scope {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Scope::Auto),
            "files" => Ok(Scope::Files),
            other => Err(RetrievalError::InvalidScope(other.to_string())),
        }
    }
}

/// A keyword rule: if any keyword occurs in the lowercased query, the
/// corpus document named `file` becomes a candidate.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RoutingRule {
    pub keywords: Vec<String>,
    pub file: String,
}

impl RoutingRule {
    pub fn new(keywords: Vec<String>, file: impl Into<String>) -> Self {
        Self {
            keywords,
            file: file.into(),
        }
    }

    fn matches(&self, lowered_query: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && lowered_query.contains(&k.to_lowercase()))
    }
}

#[derive(Debug, Default)]
pub struct RouteOutcome {
    pub candidates: Vec<DocumentRef>,
    /// Explicit paths that could not become candidates, with the reason.
    pub rejected: Vec<(String, RetrievalError)>,
}

pub struct Router {
    corpus: Vec<DocumentRef>,
    rules: Vec<RoutingRule>,
}

impl Router {
    pub fn new(corpus: Vec<DocumentRef>, rules: Vec<RoutingRule>) -> Self {
        for rule in &rules {
            if !corpus.iter().any(|d| d.file_name() == Some(rule.file.as_str())) {
                tracing::warn!(file = %rule.file, "routing rule targets a file outside the corpus");
            }
        }
        Self { corpus, rules }
    }

    pub fn corpus(&self) -> &[DocumentRef] {
        &self.corpus
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn route(&self, query: &str, scope: Scope, explicit: &[String]) -> RouteOutcome {
        match scope {
            Scope::Files => route_explicit(explicit),
            Scope::Auto => RouteOutcome {
                candidates: self.route_auto(query),
                rejected: Vec::new(),
            },
        }
    }

    fn route_auto(&self, query: &str) -> Vec<DocumentRef> {
        let lowered = query.to_lowercase();
        let targets: Vec<&str> = self
            .rules
            .iter()
            .filter(|r| r.matches(&lowered))
            .map(|r| r.file.as_str())
            .collect();

        if !targets.is_empty() {
            let selected: Vec<DocumentRef> = self
                .corpus
                .iter()
                .filter(|d| d.file_name().is_some_and(|n| targets.contains(&n)))
                .cloned()
                .collect();
            if !selected.is_empty() {
                tracing::debug!(count = selected.len(), "keyword routing selected documents");
                return selected;
            }
        }
        self.corpus.clone()
    }
}

fn route_explicit(explicit: &[String]) -> RouteOutcome {
    let mut outcome = RouteOutcome::default();
    let mut seen: Vec<&str> = Vec::new();
    for raw in explicit {
        let path = raw.trim();
        if path.is_empty() || seen.contains(&path) {
            continue;
        }
        seen.push(path);
        match DocumentRef::from_path(PathBuf::from(path)) {
            Ok(doc) => outcome.candidates.push(doc),
            Err(e) => outcome.rejected.push((path.to_string(), e)),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_routing_rules;

    fn corpus() -> Vec<DocumentRef> {
        [
            "docs/guia_ordenes_md.md",
            "docs/guia_mesas_md.md",
            "docs/guia_menus_md.md",
            "docs/resumen_ejecutivo_gastrosoft.docx",
            "docs/buenas_practicas_gastrosoft.pdf",
        ]
        .iter()
        .map(|p| DocumentRef::from_path(*p).unwrap())
        .collect()
    }

    fn names(docs: &[DocumentRef]) -> Vec<&str> {
        docs.iter().filter_map(|d| d.file_name()).collect()
    }

    #[test]
    fn scope_parsing() {
        assert_eq!("auto".parse::<Scope>().unwrap(), Scope::Auto);
        assert_eq!("FILES".parse::<Scope>().unwrap(), Scope::Files);
        assert!(matches!(
            "everything".parse::<Scope>(),
            Err(RetrievalError::InvalidScope(_))
        ));
    }

    #[test]
    fn keyword_selects_mapped_document() {
        let router = Router::new(corpus(), default_routing_rules());
        let out = router.route("¿Cómo asigno una mesa?", Scope::Auto, &[]);
        assert_eq!(names(&out.candidates), vec!["guia_mesas_md.md"]);
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let router = Router::new(corpus(), default_routing_rules());
        let out = router.route("What is the EXECUTIVE vision?", Scope::Auto, &[]);
        assert_eq!(
            names(&out.candidates),
            vec!["resumen_ejecutivo_gastrosoft.docx"]
        );
    }

    #[test]
    fn multiple_rules_keep_corpus_order() {
        let router = Router::new(corpus(), default_routing_rules());
        let out = router.route("menu tax for a table", Scope::Auto, &[]);
        assert_eq!(
            names(&out.candidates),
            vec!["guia_mesas_md.md", "guia_menus_md.md"]
        );
    }

    #[test]
    fn no_match_returns_whole_corpus() {
        let router = Router::new(corpus(), default_routing_rules());
        let out = router.route("hello there", Scope::Auto, &[]);
        assert_eq!(out.candidates, corpus());
    }

    #[test]
    fn rule_target_missing_from_corpus_falls_back() {
        let rules = vec![RoutingRule::new(vec!["zebra".into()], "zoo.md")];
        let router = Router::new(corpus(), rules);
        let out = router.route("zebra", Scope::Auto, &[]);
        assert_eq!(out.candidates.len(), 5);
    }

    #[test]
    fn explicit_files_dedup_and_reject() {
        let router = Router::new(Vec::new(), Vec::new());
        let files = vec![
            "a.md".to_string(),
            "notes.txt".to_string(),
            "a.md".to_string(),
            "b.pdf".to_string(),
        ];
        let out = router.route("anything", Scope::Files, &files);
        let paths: Vec<_> = out.candidates.iter().map(|d| d.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("a.md"), PathBuf::from("b.pdf")]);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].0, "notes.txt");
        assert!(matches!(
            out.rejected[0].1,
            RetrievalError::UnsupportedKind(_)
        ));
    }
}
