//! In-memory keyword knowledge index.
//!
//! Token-overlap stand-in for the external vector store, backing the demo
//! binary and the test suite. One index holds one role's collection; the
//! production deployment points the pipeline at the real search service
//! instead.

use std::collections::HashSet;
use std::path::Path;

use futures::future::BoxFuture;
use rand::seq::SliceRandom;

use medflow_core::error::{FlowError, Result};
use medflow_core::traits::SearchIndex;
use medflow_core::types::{Candidate, KbEntry, Role};

pub struct KeywordIndex {
    entries: Vec<KbEntry>,
}

impl KeywordIndex {
    pub fn new(entries: Vec<KbEntry>) -> Self {
        Self { entries }
    }

    /// Load entries from a JSON array file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("cannot read {}: {e}", path.display())))?;
        let entries: Vec<KbEntry> = serde_json::from_str(&raw)
            .map_err(|e| FlowError::Config(format!("invalid knowledge file: {e}")))?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn score(query: &str, question: &str) -> f32 {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let question_tokens: HashSet<String> = tokenize(question).into_iter().collect();
        let hits = query_tokens
            .iter()
            .filter(|t| question_tokens.contains(*t))
            .count();
        hits as f32 / query_tokens.len() as f32
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl SearchIndex for KeywordIndex {
    fn search(
        &self,
        query: &str,
        category: Option<&str>,
        subcategory: Option<&str>,
        top_k: usize,
    ) -> BoxFuture<'_, Result<Vec<Candidate>>> {
        let query = query.to_string();
        let category = category.map(str::to_string);
        let subcategory = subcategory.map(str::to_string);
        Box::pin(async move {
            let mut hits: Vec<Candidate> = self
                .entries
                .iter()
                .filter(|e| match &category {
                    Some(c) => e.category.as_deref() == Some(c.as_str()),
                    None => true,
                })
                .filter(|e| match &subcategory {
                    Some(s) => e.subcategory.as_deref() == Some(s.as_str()),
                    None => true,
                })
                .filter_map(|e| {
                    let score = Self::score(&query, &e.question);
                    (score > 0.0).then(|| Candidate {
                        id: e.id.clone(),
                        question: e.question.clone(),
                        score,
                    })
                })
                .collect();
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(top_k);
            Ok(hits)
        })
    }

    fn fetch_by_ids(&self, ids: &[String]) -> BoxFuture<'_, Result<Vec<KbEntry>>> {
        let wanted: HashSet<String> = ids.iter().cloned().collect();
        Box::pin(async move {
            Ok(self
                .entries
                .iter()
                .filter(|e| wanted.contains(&e.id))
                .cloned()
                .collect())
        })
    }

    fn sample_for_role(&self, _role: Role, n: usize) -> BoxFuture<'_, Result<Vec<KbEntry>>> {
        // One index per role; the role argument selects the collection in
        // the real search service.
        Box::pin(async move {
            let mut rng = rand::thread_rng();
            Ok(self
                .entries
                .choose_multiple(&mut rng, n)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, question: &str, category: Option<&str>) -> KbEntry {
        KbEntry {
            id: id.into(),
            question: question.into(),
            answer: format!("answer for {id}"),
            category: category.map(str::to_string),
            subcategory: None,
        }
    }

    fn index() -> KeywordIndex {
        KeywordIndex::new(vec![
            entry("1", "đau răng khi ăn đồ lạnh phải làm sao", Some("rang")),
            entry("2", "đau răng khôn có nên nhổ không", Some("rang")),
            entry("3", "tiểu đường nên ăn gì", Some("dinh-duong")),
        ])
    }

    #[tokio::test]
    async fn test_search_scores_and_orders() {
        let hits = index().search("đau răng", None, None, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|c| c.score > 0.0));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_category_filter() {
        let hits = index()
            .search("đau răng", Some("dinh-duong"), None, 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_by_ids_ignores_unknown() {
        let entries = index()
            .fetch_by_ids(&["2".into(), "ghost".into()])
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "2");
    }

    #[tokio::test]
    async fn test_sample_bounded_by_population() {
        let sampled = index()
            .sample_for_role(Role::PatientDental, 10)
            .await
            .unwrap();
        assert_eq!(sampled.len(), 3);
    }
}
