//! # Session Storage Module
//!
//! Persistence for finalized session aggregates - the durable half of the
//! `end_session` contract. The store is an external collaborator behind a
//! trait; the state machine only ever sees `save` succeed or fail.
//!
//! ## Key Components:
//! - **SessionStore trait**: save / load / list / delete, async
//! - **FileSessionStore**: one JSON document per session with an in-memory
//!   cache in front (the production default)
//! - **MemorySessionStore**: pure in-memory variant for tests and ephemeral
//!   deployments
//!
//! ## Semantics:
//! `save` is an idempotent upsert with last-write-wins; single-writer per
//! session id is guaranteed upstream by the session registry, so the store
//! needs no cross-session transactions.

pub mod file;
pub mod memory;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use crate::session::SessionAggregate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from the persistence layer.
#[derive(Debug)]
pub enum StoreError {
    /// The session id is not safe to use as a storage key
    InvalidId(String),

    /// Filesystem-level failure
    Io(String),

    /// The stored document (or the aggregate) didn't (de)serialize
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidId(msg) => write!(f, "Invalid session id: {}", msg),
            StoreError::Io(msg) => write!(f, "Storage I/O error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Storage serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Summary row for session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_questions: usize,
    pub word_count: usize,
}

impl SessionSummary {
    pub fn from_aggregate(aggregate: &SessionAggregate) -> Self {
        Self {
            session_id: aggregate.session_id.clone(),
            started_at: aggregate.started_at,
            ended_at: aggregate.ended_at,
            total_questions: aggregate.total_questions,
            word_count: aggregate.word_count(),
        }
    }
}

/// Persistence interface for session aggregates.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Idempotent upsert; calling twice with the same id is last-write-wins.
    async fn save(&self, session_id: &str, aggregate: &SessionAggregate) -> Result<(), StoreError>;

    /// Load a stored aggregate, `None` when the id is unknown.
    async fn load(&self, session_id: &str) -> Result<Option<SessionAggregate>, StoreError>;

    /// Summaries of all stored sessions, newest first.
    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError>;

    /// Remove a stored session; `true` if something was deleted.
    async fn delete(&self, session_id: &str) -> Result<bool, StoreError>;
}

/// Whether a session id is safe to use as a storage key (and URL path
/// segment). Checked once at connection time; the file store re-checks as a
/// second line of defense so an id can never escape the data directory.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !session_id.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("interview-2025-01-01"));
        assert!(is_valid_session_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_session_id("s_1.final"));

        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../escape"));
        assert!(!is_valid_session_id("a/b"));
        assert!(!is_valid_session_id(".hidden"));
        assert!(!is_valid_session_id("with space"));
        assert!(!is_valid_session_id(&"x".repeat(200)));
    }

    #[test]
    fn test_summary_from_aggregate() {
        let mut aggregate = SessionAggregate::new("s1".to_string());
        aggregate.seal();
        let summary = SessionSummary::from_aggregate(&aggregate);
        assert_eq!(summary.session_id, "s1");
        assert_eq!(summary.total_questions, 0);
        assert!(summary.ended_at.is_some());
    }
}
