//! # Session Registry
//!
//! Tracks which session ids currently have a live connection. The registry
//! is constructed once at startup and injected into the connection handler -
//! deliberately not a module-level global, so tests can build one, drive it
//! directly, and throw it away.
//!
//! ## What it enforces:
//! - **Single writer per session id**: a second connection claiming a live
//!   session id is rejected before the WebSocket upgrade completes
//! - **Capacity**: at most `max_concurrent_sessions` live connections
//!
//! ## Lifecycle:
//! Registered on connect, deregistered when the connection actor stops
//! (normal end or abrupt disconnect alike).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Why a registration was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// The session id already has a live connection
    AlreadyConnected(String),

    /// The concurrent-session cap is reached
    AtCapacity(usize),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyConnected(id) => {
                write!(f, "Session '{}' already has a live connection", id)
            }
            RegistryError::AtCapacity(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
        }
    }
}

/// Bookkeeping for one live connection.
#[derive(Debug, Clone)]
struct ConnectionInfo {
    connected_at: DateTime<Utc>,
}

/// Registry of live streaming sessions.
///
/// ## Thread Safety:
/// Uses RwLock to allow multiple readers (health checks, status queries) or
/// one writer (connect/disconnect) at a time.
pub struct SessionRegistry {
    /// Live sessions mapped by session ID
    sessions: RwLock<HashMap<String, ConnectionInfo>>,

    /// Maximum number of concurrent sessions allowed
    max_concurrent_sessions: usize,
}

impl SessionRegistry {
    /// Create a new registry with the given capacity.
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Claim a session id for a new connection.
    ///
    /// ## Returns:
    /// - **Ok(())**: The id is now owned by this connection
    /// - **Err(RegistryError)**: Capacity reached or the id is already live
    pub fn register(&self, session_id: &str) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(RegistryError::AtCapacity(self.max_concurrent_sessions));
        }

        if sessions.contains_key(session_id) {
            return Err(RegistryError::AlreadyConnected(session_id.to_string()));
        }

        sessions.insert(
            session_id.to_string(),
            ConnectionInfo {
                connected_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Release a session id (connection closed).
    pub fn deregister(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        sessions.remove(session_id).is_some()
    }

    /// Whether the session id currently has a live connection.
    pub fn is_active(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap();
        sessions.contains_key(session_id)
    }

    /// Number of live connections.
    pub fn active_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap();
        sessions.len()
    }

    /// Capacity this registry enforces.
    pub fn max_sessions(&self) -> usize {
        self.max_concurrent_sessions
    }

    /// Ids of all live sessions (for the health endpoint).
    pub fn active_session_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().unwrap();
        sessions.keys().cloned().collect()
    }

    /// When the given session connected, if it is live.
    pub fn connected_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).map(|info| info.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_deregister() {
        let registry = SessionRegistry::new(4);

        assert!(registry.register("s1").is_ok());
        assert!(registry.is_active("s1"));
        assert_eq!(registry.active_count(), 1);
        assert!(registry.connected_at("s1").is_some());

        assert!(registry.deregister("s1"));
        assert!(!registry.is_active("s1"));
        assert!(!registry.deregister("s1"));
    }

    #[test]
    fn test_duplicate_session_id_rejected() {
        let registry = SessionRegistry::new(4);
        registry.register("s1").unwrap();

        let err = registry.register("s1").unwrap_err();
        assert_eq!(err, RegistryError::AlreadyConnected("s1".to_string()));

        // After the first connection goes away, the id is reusable
        registry.deregister("s1");
        assert!(registry.register("s1").is_ok());
    }

    #[test]
    fn test_capacity_enforced() {
        let registry = SessionRegistry::new(2);
        registry.register("s1").unwrap();
        registry.register("s2").unwrap();

        let err = registry.register("s3").unwrap_err();
        assert_eq!(err, RegistryError::AtCapacity(2));

        registry.deregister("s1");
        assert!(registry.register("s3").is_ok());
    }
}
