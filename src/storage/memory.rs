//! # In-Memory Session Store
//!
//! The cache half of the file store on its own: a HashMap behind an async
//! RwLock. Used by tests and by deployments that don't need durability
//! across restarts.

use crate::session::SessionAggregate;
use crate::storage::{is_valid_session_id, SessionStore, SessionSummary, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Ephemeral session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionAggregate>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session_id: &str, aggregate: &SessionAggregate) -> Result<(), StoreError> {
        if !is_valid_session_id(session_id) {
            return Err(StoreError::InvalidId(format!(
                "'{}' is not a valid session id",
                session_id
            )));
        }

        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), aggregate.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionAggregate>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> =
            sessions.values().map(SessionSummary::from_aggregate).collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}
