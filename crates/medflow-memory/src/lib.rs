//! SQLite-backed per-user memory store.
//!
//! Implements the [`UserMemory`] collaborator: inserts mint fresh uuid
//! identifiers, deletes run as one bulk statement with per-id outcomes, and
//! relevance ranking is a naive token-overlap score — good enough for the
//! top-N snapshot the pipeline feeds to the mutation planner.

mod store;

pub use store::SqliteMemory;

/// Token-overlap relevance between a query and a memory's content.
///
/// Score = |query tokens ∩ content tokens| / |query tokens|, case-folded.
pub(crate) fn overlap_score(query: &str, content: &str) -> f32 {
    let query_tokens: Vec<String> = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens: std::collections::HashSet<String> =
        tokenize(content).into_iter().collect();
    let hits = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(*t))
        .count();
    hits as f32 / query_tokens.len() as f32
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_score() {
        assert_eq!(overlap_score("đau răng", "bị đau răng nhiều ngày"), 1.0);
        assert_eq!(overlap_score("đau răng", "tiểu đường type 2"), 0.0);
        let partial = overlap_score("đau răng khôn", "răng khôn mọc lệch");
        assert!(partial > 0.5 && partial < 1.0);
    }

    #[test]
    fn test_tokenize_strips_punctuation() {
        assert_eq!(tokenize("Đau răng, sốt!"), vec!["đau", "răng", "sốt"]);
        assert!(tokenize("...").is_empty());
    }
}
