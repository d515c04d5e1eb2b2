//! # File-Backed Session Store
//!
//! One pretty-printed JSON document per session under the configured data
//! directory, with an in-memory cache in front for read traffic. Writes go
//! through a temp file followed by a rename, so a crashed write can never
//! leave a half-written document where a session used to be.

use crate::session::SessionAggregate;
use crate::storage::{is_valid_session_id, SessionStore, SessionSummary, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// JSON-file-per-session store with an in-memory cache.
pub struct FileSessionStore {
    storage_dir: PathBuf,
    cache: RwLock<HashMap<String, SessionAggregate>>,
}

impl FileSessionStore {
    /// Open (and create if needed) a store rooted at `storage_dir`.
    pub async fn new(storage_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.into();

        tokio::fs::create_dir_all(&storage_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create storage directory: {}", e)))?;

        info!("Session store ready at {}", storage_dir.display());

        Ok(Self {
            storage_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.json", session_id))
    }

    fn check_id(session_id: &str) -> Result<(), StoreError> {
        if is_valid_session_id(session_id) {
            Ok(())
        } else {
            Err(StoreError::InvalidId(format!(
                "'{}' is not a valid session id",
                session_id
            )))
        }
    }

    async fn read_document(path: &Path) -> Result<Option<SessionAggregate>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("Failed to read {}: {}", path.display(), e))),
        };

        let aggregate = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e)))?;
        Ok(Some(aggregate))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session_id: &str, aggregate: &SessionAggregate) -> Result<(), StoreError> {
        Self::check_id(session_id)?;

        let json = serde_json::to_vec_pretty(aggregate)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Write-then-rename keeps the visible document whole at all times;
        // re-saving the same id just replaces it (last-write-wins).
        let final_path = self.session_path(session_id);
        let tmp_path = self
            .storage_dir
            .join(format!("{}.json.tmp-{}", session_id, Uuid::new_v4()));

        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to write {}: {}", tmp_path.display(), e)))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            // Best effort: don't leave the temp file behind on failure
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(format!(
                "Failed to move session document into place: {}",
                e
            )));
        }

        self.cache
            .write()
            .await
            .insert(session_id.to_string(), aggregate.clone());

        info!(
            "Session '{}' saved ({} questions, {} bytes)",
            session_id,
            aggregate.total_questions,
            json.len()
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionAggregate>, StoreError> {
        Self::check_id(session_id)?;

        // Cache first
        if let Some(aggregate) = self.cache.read().await.get(session_id) {
            debug!("Session '{}' served from cache", session_id);
            return Ok(Some(aggregate.clone()));
        }

        // Fall back to the file
        match Self::read_document(&self.session_path(session_id)).await? {
            Some(aggregate) => {
                self.cache
                    .write()
                    .await
                    .insert(session_id.to_string(), aggregate.clone());
                Ok(Some(aggregate))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.storage_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to list storage directory: {}", e)))?;

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            // A single unreadable document shouldn't break the listing
            match Self::read_document(&path).await {
                Ok(Some(aggregate)) => summaries.push(SessionSummary::from_aggregate(&aggregate)),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable session document: {}", e),
            }
        }

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        Self::check_id(session_id)?;

        let cached = self.cache.write().await.remove(session_id).is_some();

        match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => {
                info!("Session '{}' deleted", session_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(cached),
            Err(e) => Err(StoreError::Io(format!("Failed to delete session: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{LanguageMetrics, SpeechMetrics};
    use crate::session::segment::QuestionSegment;
    use chrono::Utc;

    fn aggregate(session_id: &str, transcripts: &[&str]) -> SessionAggregate {
        let mut aggregate = SessionAggregate::new(session_id.to_string());
        for (i, transcript) in transcripts.iter().enumerate() {
            aggregate.append(QuestionSegment {
                question_id: format!("q{}", i + 1),
                question_text: format!("prompt {}", i + 1),
                started_at: Utc::now(),
                ended_at: Some(Utc::now()),
                transcript: transcript.to_string(),
                speech_metrics: Some(SpeechMetrics::zeroed()),
                language_metrics: Some(LanguageMetrics::zeroed()),
                chunk_count: 2,
                error: None,
            });
        }
        aggregate.seal();
        aggregate
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();

        let original = aggregate("s1", &["first answer", "second answer"]);
        store.save("s1", &original).await.unwrap();

        let loaded = store.load("s1").await.unwrap().expect("session expected");
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_load_survives_cold_cache() {
        let dir = tempfile::tempdir().unwrap();
        let original = aggregate("s1", &["the answer"]);

        {
            let store = FileSessionStore::new(dir.path()).await.unwrap();
            store.save("s1", &original).await.unwrap();
        }

        // A fresh store instance has an empty cache and reads from disk
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        let loaded = store.load("s1").await.unwrap().expect("session expected");
        assert_eq!(loaded, original);
    }

    // Repeated saves of the same id converge to one stored record.
    #[tokio::test]
    async fn test_save_is_idempotent_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();

        let first = aggregate("s1", &["draft answer"]);
        let second = aggregate("s1", &["final answer"]);

        store.save("s1", &first).await.unwrap();
        store.save("s1", &second).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.full_transcript, "final answer");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_unknown_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();

        store.save("s1", &aggregate("s1", &["a"])).await.unwrap();
        store.save("s2", &aggregate("s2", &["b", "c"])).await.unwrap();

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().any(|s| s.session_id == "s2" && s.total_questions == 2));

        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_escaping_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();

        let result = store.save("../escape", &aggregate("x", &[])).await;
        assert!(matches!(result, Err(StoreError::InvalidId(_))));

        let result = store.load("a/b").await;
        assert!(matches!(result, Err(StoreError::InvalidId(_))));
    }
}
