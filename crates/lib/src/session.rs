//! Chat identity to NLU session id mapping.
//!
//! Each chat identity gets one session id on first contact; the NLU service uses it
//! to keep conversation context. Entries live for the process lifetime.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// In-memory registry: chat identity -> session id. Never shrinks, never rebinds.
/// Share it by wrapping the registry in an `Arc`.
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, SessionId>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Return the session id for `chat_id`, generating and storing one on first contact.
    pub async fn resolve_session(&self, chat_id: &str) -> SessionId {
        if let Some(id) = self.inner.read().await.get(chat_id) {
            return id.clone();
        }
        let mut g = self.inner.write().await;
        // Another request may have inserted between the read and write lock.
        g.entry(chat_id.to_string())
            .or_insert_with(new_session_id)
            .clone()
    }

    /// Session id for `chat_id` if one was assigned.
    pub async fn get(&self, chat_id: &str) -> Option<SessionId> {
        self.inner.read().await.get(chat_id).cloned()
    }

    /// Number of chat identities seen so far.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

fn new_session_id() -> SessionId {
    format!("sess-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolve_is_idempotent_per_chat() {
        let registry = SessionRegistry::new();
        let first = registry.resolve_session("u1").await;
        let again = registry.resolve_session("u1").await;
        assert_eq!(first, again);
        assert!(first.starts_with("sess-"));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get("u1").await.as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn distinct_chats_get_distinct_sessions() {
        let registry = SessionRegistry::new();
        let mut ids = HashSet::new();
        for i in 0..50 {
            ids.insert(registry.resolve_session(&format!("chat-{}", i)).await);
        }
        assert_eq!(ids.len(), 50);
        assert_eq!(registry.len().await, 50);
    }

    #[tokio::test]
    async fn unseen_chat_has_no_session() {
        let registry = SessionRegistry::default();
        assert!(registry.is_empty().await);
        assert!(registry.get("nobody").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_first_contact_yields_one_id() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let r = registry.clone();
            handles.push(tokio::spawn(async move { r.resolve_session("same").await }));
        }
        let mut ids = HashSet::new();
        for h in handles {
            ids.insert(h.await.unwrap());
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(registry.len().await, 1);
    }
}
