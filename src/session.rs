//! In-memory session/transcript store.
//!
//! Handlers take a snapshot of a session's conversation, let the controller work
//! on the copy, and commit it back only after a reply was built. Two in-flight
//! requests on the same session race; the later commit wins. Per-session
//! serialization is the transport's job.

use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::Conversation;

#[derive(Clone, Default)]
pub struct SessionStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Working copy of the session's conversation (empty for a new session).
    #[instrument(level = "debug", skip(self))]
    pub async fn snapshot(&self, session_id: &str) -> Conversation {
        self.conversations
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the stored conversation with the committed working copy.
    #[instrument(level = "debug", skip(self, conversation), fields(turns = conversation.turns().len()))]
    pub async fn commit(&self, session_id: &str, conversation: Conversation) {
        self.conversations
            .write()
            .await
            .insert(session_id.to_string(), conversation);
        debug!(target: "tutoring", %session_id, "Session committed");
    }

    /// Drop a session (session end is decided outside the core).
    pub async fn end(&self, session_id: &str) -> bool {
        self.conversations.write().await.remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;

    #[tokio::test]
    async fn snapshot_is_isolated_until_commit() {
        let store = SessionStore::new();
        let mut working = store.snapshot("s1").await;
        working.push(Role::Student, "hello", None);

        assert!(store.snapshot("s1").await.is_empty());
        store.commit("s1", working).await;
        assert_eq!(store.snapshot("s1").await.turns().len(), 1);
        assert!(store.snapshot("s2").await.is_empty());

        assert!(store.end("s1").await);
        assert!(store.snapshot("s1").await.is_empty());
    }
}
