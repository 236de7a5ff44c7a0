//! Extractive answer composition from ranked passages.

use crate::models::SearchResult;

/// Returned when no passage is good enough to answer from.
pub const INSUFFICIENT_CONTEXT: &str =
    "I could not find enough context in the documentation to answer this question.";

#[derive(Debug, Clone, Copy)]
pub struct AnswerComposer {
    pub max_chars: usize,
    pub max_passages: usize,
}

impl Default for AnswerComposer {
    fn default() -> Self {
        Self {
            max_chars: 600,
            max_passages: 4,
        }
    }
}

impl AnswerComposer {
    /// Join the best distinct passages, in rank order, separated by blank
    /// lines. Each passage is cut to `max_chars` at a word boundary.
    pub fn compose(&self, results: &[SearchResult]) -> String {
        let mut seen: Vec<&str> = Vec::new();
        let mut passages: Vec<String> = Vec::new();
        for result in results {
            if passages.len() == self.max_passages {
                break;
            }
            if seen.contains(&result.source.as_str()) {
                continue;
            }
            seen.push(&result.source);
            let text = result.snippet.trim();
            if text.is_empty() {
                continue;
            }
            passages.push(truncate_at_word(text, self.max_chars));
        }

        if passages.is_empty() {
            INSUFFICIENT_CONTEXT.to_string()
        } else {
            passages.join("\n\n")
        }
    }
}

/// Cut `text` to at most `max_chars` characters, backing off to the last
/// whitespace, and mark the cut with `…`.
fn truncate_at_word(text: &str, max_chars: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };
    let head = &text[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(ws) if ws > 0 => &head[..ws],
        _ => head,
    };
    format!("{}…", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(source: &str, score: f32, snippet: &str) -> SearchResult {
        SearchResult {
            source: source.to_string(),
            score,
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn empty_results_give_insufficient_context() {
        assert_eq!(AnswerComposer::default().compose(&[]), INSUFFICIENT_CONTEXT);
    }

    #[test]
    fn dedups_by_source_and_keeps_rank_order() {
        let results = vec![
            result("a.md#section-2", 0.9, "Close the ticket."),
            result("a.md#section-2", 0.8, "Duplicate window."),
            result("b.md#section-1", 0.7, "Open a ticket."),
        ];
        let answer = AnswerComposer::default().compose(&results);
        assert_eq!(answer, "Close the ticket.\n\nOpen a ticket.");
    }

    #[test]
    fn at_most_max_passages() {
        let results: Vec<_> = (0..6)
            .map(|i| result(&format!("a.md#section-{}", i), 0.5, &format!("p{}", i)))
            .collect();
        let answer = AnswerComposer::default().compose(&results);
        assert_eq!(answer.split("\n\n").count(), 4);
    }

    #[test]
    fn long_snippet_is_cut_at_a_word_boundary() {
        let composer = AnswerComposer {
            max_chars: 12,
            max_passages: 4,
        };
        let answer = composer.compose(&[result("a", 1.0, "alpha beta gamma delta")]);
        assert_eq!(answer, "alpha beta…");
    }

    #[test]
    fn short_snippet_is_untouched() {
        assert_eq!(truncate_at_word("hello world", 600), "hello world");
        assert_eq!(truncate_at_word("abcdef", 6), "abcdef");
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let cut = truncate_at_word("ñññññ ééééé", 8);
        assert_eq!(cut, "ñññññ…");
        let cut = truncate_at_word("ñññññññññ", 4);
        assert_eq!(cut, "ññññ…");
    }
}
