//! Conversation session store
//!
//! Sessions hold the ordered turn history used for follow-up resolution
//! during planning and synthesis. Appends within one session are
//! serialized; reads see a consistent snapshot.

use crate::models::Turn;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Mint a fresh session id with empty history.
    async fn new_session(&self) -> Result<String>;

    /// Snapshot of the most recent `limit` turns, oldest first. Unknown
    /// sessions read as empty rather than erroring.
    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// Record one completed turn. Creates the session if it does not
    /// exist, so callers may pass ids minted elsewhere.
    async fn append(&self, session_id: &str, turn: Turn) -> Result<()>;

    async fn evict(&self, session_id: &str) -> Result<()>;
}

/// Process-local store. Each session owns its own lock so concurrent
/// appends to different sessions never contend.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Vec<Turn>>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn session(&self, session_id: &str) -> Arc<Mutex<Vec<Turn>>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(turns) = sessions.get(session_id) {
                return Arc::clone(turns);
            }
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Vec::new()))),
        )
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn new_session(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(Vec::new())));
        debug!(session_id = %session_id, "Created session");
        Ok(session_id)
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let sessions = self.sessions.read().await;
        let Some(turns) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let turns = turns.lock().await;
        let skip = turns.len().saturating_sub(limit);
        Ok(turns[skip..].to_vec())
    }

    async fn append(&self, session_id: &str, turn: Turn) -> Result<()> {
        let session = self.session(session_id).await;
        let mut turns = session.lock().await;
        turns.push(turn);
        Ok(())
    }

    async fn evict(&self, session_id: &str) -> Result<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(query: &str, answer: &str) -> Turn {
        Turn {
            query: query.to_string(),
            answer: answer.to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_history_roundtrip() {
        let store = InMemorySessionStore::new();
        let id = store.new_session().await.unwrap();

        store.append(&id, turn("q1", "a1")).await.unwrap();
        store.append(&id, turn("q2", "a2")).await.unwrap();

        let history = store.history(&id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].query, "q1");
        assert_eq!(history[1].query, "q2");
    }

    #[tokio::test]
    async fn test_history_limit_keeps_most_recent() {
        let store = InMemorySessionStore::new();
        let id = store.new_session().await.unwrap();
        for i in 0..5 {
            store
                .append(&id, turn(&format!("q{}", i), &format!("a{}", i)))
                .await
                .unwrap();
        }

        let history = store.history(&id, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].query, "q3");
        assert_eq!(history[1].query, "q4");
    }

    #[tokio::test]
    async fn test_unknown_session_reads_empty() {
        let store = InMemorySessionStore::new();
        assert!(store.history("missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_creates_session_implicitly() {
        let store = InMemorySessionStore::new();
        store.append("external-id", turn("q", "a")).await.unwrap();
        assert_eq!(store.history("external-id", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_evict_drops_history() {
        let store = InMemorySessionStore::new();
        let id = store.new_session().await.unwrap();
        store.append(&id, turn("q", "a")).await.unwrap();
        store.evict(&id).await.unwrap();
        assert!(store.history(&id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let store = Arc::new(InMemorySessionStore::new());
        let id = store.new_session().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(&id, turn(&format!("q{}", i), "a"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.history(&id, 100).await.unwrap().len(), 20);
    }
}
