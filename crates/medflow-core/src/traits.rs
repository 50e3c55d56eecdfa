use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Candidate, KbEntry, MemoryEntry, MemoryId, Role};

/// Language-model collaborator.
///
/// `complete` returns plain text that callers parse into a constrained
/// structured format. Overload is always surfaced as
/// [`FlowError::Overloaded`](crate::error::FlowError::Overloaded), never as a
/// generic failure, so nodes can route to their fallback edge.
pub trait LanguageModel: Send + Sync + 'static {
    /// One completion. `fast_mode` selects a cheaper/faster model where the
    /// provider offers one.
    fn complete(&self, prompt: &str, fast_mode: bool) -> BoxFuture<'_, Result<String>>;
}

/// Knowledge-base search collaborator.
///
/// Backed externally (vector store); consumed here as scored-candidate lookup.
pub trait SearchIndex: Send + Sync + 'static {
    /// Similarity search, optionally narrowed by category/subcategory.
    /// Results are ordered best-first.
    fn search(
        &self,
        query: &str,
        category: Option<&str>,
        subcategory: Option<&str>,
        top_k: usize,
    ) -> BoxFuture<'_, Result<Vec<Candidate>>>;

    /// Fetch full entries for the given identifiers. Output order is not
    /// guaranteed to match the input order.
    fn fetch_by_ids(&self, ids: &[String]) -> BoxFuture<'_, Result<Vec<KbEntry>>>;

    /// Sample up to `n` entries for a role. Fallback source for suggestion
    /// questions when composition is unavailable.
    fn sample_for_role(&self, role: Role, n: usize) -> BoxFuture<'_, Result<Vec<KbEntry>>>;
}

/// Per-user long-term memory collaborator.
pub trait UserMemory: Send + Sync + 'static {
    /// Store a new memory, minting a fresh identifier.
    fn insert(&self, user: &str, content: &str) -> BoxFuture<'_, Result<MemoryId>>;

    /// Replace the content of an existing memory.
    fn update(&self, user: &str, id: &MemoryId, content: &str) -> BoxFuture<'_, Result<()>>;

    /// Delete several memories in one store call, reporting per-id outcomes.
    #[allow(clippy::type_complexity)]
    fn batch_delete(
        &self,
        user: &str,
        ids: &[MemoryId],
    ) -> BoxFuture<'_, Result<Vec<(MemoryId, Result<()>)>>>;

    /// Top-`n` memories relevant to the query, best-first.
    fn relevant(
        &self,
        user: &str,
        query: &str,
        n: usize,
    ) -> BoxFuture<'_, Result<Vec<MemoryEntry>>>;
}
