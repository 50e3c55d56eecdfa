use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use medflow_core::error::{FlowError, Result};
use medflow_core::traits::UserMemory;
use medflow_core::types::{MemoryEntry, MemoryId};

use crate::overlap_score;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memories (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);";

/// SQLite-backed user memory.
pub struct SqliteMemory {
    conn: Mutex<Connection>,
}

impl SqliteMemory {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowError::Database(format!("failed to create db directory: {e}"))
            })?;
        }

        let conn =
            Connection::open(path).map_err(|e| FlowError::Database(e.to_string()))?;

        // WAL for better concurrent read behavior
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| FlowError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowError::Database(e.to_string()))?;

        debug!(path = %path.display(), "memory store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| FlowError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FlowError::Database("connection mutex poisoned".into()))
    }
}

impl UserMemory for SqliteMemory {
    fn insert(&self, user: &str, content: &str) -> BoxFuture<'_, Result<MemoryId>> {
        let user = user.to_string();
        let content = content.to_string();
        Box::pin(async move {
            let id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO memories (id, user_id, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, user, content, now],
            )
            .map_err(|e| FlowError::Memory(format!("insert failed: {e}")))?;
            debug!(user = %user, id = %id, "memory inserted");
            Ok(id)
        })
    }

    fn update(&self, user: &str, id: &MemoryId, content: &str) -> BoxFuture<'_, Result<()>> {
        let user = user.to_string();
        let id = id.clone();
        let content = content.to_string();
        Box::pin(async move {
            let now = Utc::now().to_rfc3339();
            let conn = self.lock()?;
            let changed = conn
                .execute(
                    "UPDATE memories SET content = ?1, updated_at = ?2
                     WHERE id = ?3 AND user_id = ?4",
                    params![content, now, id, user],
                )
                .map_err(|e| FlowError::Memory(format!("update failed: {e}")))?;
            if changed == 0 {
                return Err(FlowError::Memory(format!("no memory with id {id}")));
            }
            Ok(())
        })
    }

    fn batch_delete(
        &self,
        user: &str,
        ids: &[MemoryId],
    ) -> BoxFuture<'_, Result<Vec<(MemoryId, Result<()>)>>> {
        let user = user.to_string();
        let ids = ids.to_vec();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut outcomes = Vec::with_capacity(ids.len());
            for id in ids {
                let result = conn
                    .execute(
                        "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
                        params![id, user],
                    )
                    .map_err(|e| FlowError::Memory(format!("delete failed: {e}")))
                    .and_then(|changed| {
                        if changed == 0 {
                            Err(FlowError::Memory(format!("no memory with id {id}")))
                        } else {
                            Ok(())
                        }
                    });
                outcomes.push((id, result));
            }
            Ok(outcomes)
        })
    }

    fn relevant(
        &self,
        user: &str,
        query: &str,
        n: usize,
    ) -> BoxFuture<'_, Result<Vec<MemoryEntry>>> {
        let user = user.to_string();
        let query = query.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT id, content FROM memories WHERE user_id = ?1")
                .map_err(|e| FlowError::Memory(e.to_string()))?;
            let rows = stmt
                .query_map(params![user], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| FlowError::Memory(e.to_string()))?;

            let mut scored: Vec<MemoryEntry> = Vec::new();
            for row in rows {
                let (id, content) = row.map_err(|e| FlowError::Memory(e.to_string()))?;
                let score = overlap_score(&query, &content);
                if score > 0.0 {
                    scored.push(MemoryEntry { id, content, score });
                }
            }
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(n);
            Ok(scored)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_mints_distinct_ids() {
        let store = SqliteMemory::in_memory().unwrap();
        let a = store.insert("u1", "thích đọc sách").await.unwrap();
        let b = store.insert("u1", "30 tuổi").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_update_missing_id_errors() {
        let store = SqliteMemory::in_memory().unwrap();
        let err = store
            .update("u1", &"ghost".to_string(), "new content")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Memory(_)));
    }

    #[tokio::test]
    async fn test_update_is_scoped_to_user() {
        let store = SqliteMemory::in_memory().unwrap();
        let id = store.insert("u1", "original").await.unwrap();
        assert!(store.update("u2", &id, "hijacked").await.is_err());
        assert!(store.update("u1", &id, "revised").await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_delete_reports_per_id_outcomes() {
        let store = SqliteMemory::in_memory().unwrap();
        let a = store.insert("u1", "one").await.unwrap();
        let b = store.insert("u1", "two").await.unwrap();

        let outcomes = store
            .batch_delete("u1", &[a.clone(), "ghost".to_string(), b.clone()])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[1].1.is_err());
        assert!(outcomes[2].1.is_ok());
    }

    #[tokio::test]
    async fn test_relevant_ranks_by_overlap() {
        let store = SqliteMemory::in_memory().unwrap();
        store
            .insert("u1", "bệnh nhân hay đau răng khi ăn đồ lạnh")
            .await
            .unwrap();
        store.insert("u1", "thích uống cà phê").await.unwrap();
        store
            .insert("u2", "đau răng của người khác")
            .await
            .unwrap();

        let hits = store.relevant("u1", "đau răng", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("đau răng"));
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memories.db");
        let store = SqliteMemory::open(&path).unwrap();
        let id = store.insert("u1", "persisted").await.unwrap();
        assert!(!id.is_empty());
        assert!(path.exists());
    }
}
