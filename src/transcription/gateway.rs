//! # Transcription Gateway
//!
//! Timeout-bounded front door to the transcription backend. The session state
//! machine never calls a backend directly; it goes through the gateway so
//! that a wedged backend turns into a recoverable media failure instead of a
//! hung connection.
//!
//! ## Key Responsibilities:
//! - **Input validation**: Reject empty audio before spending a network call
//! - **Timeout enforcement**: Bound every backend call with the configured limit
//! - **Error normalization**: A timeout surfaces as `TranscriptionError::Timeout`,
//!   indistinguishable in handling from any other backend failure

use crate::transcription::{Transcriber, Transcript, TranscriptionError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded wrapper around a [`Transcriber`] backend.
///
/// ## Thread Safety:
/// Holds the backend behind an `Arc`, so the gateway itself is cheap to clone
/// and share across finalization tasks.
#[derive(Clone)]
pub struct TranscriptionGateway {
    /// The backend performing the actual speech-to-text work
    backend: Arc<dyn Transcriber>,

    /// Hard bound on a single transcription call
    timeout: Duration,
}

impl TranscriptionGateway {
    /// Create a new gateway around the given backend.
    pub fn new(backend: Arc<dyn Transcriber>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Name of the wrapped backend (for logging and health reporting).
    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Transcribe canonical WAV audio, bounded by the configured timeout.
    ///
    /// ## Returns:
    /// - **Ok(Transcript)**: Backend answered within the bound
    /// - **Err(TranscriptionError)**: Empty input, backend failure, or timeout
    pub async fn transcribe(&self, wav_bytes: &[u8]) -> Result<Transcript, TranscriptionError> {
        if wav_bytes.is_empty() {
            return Err(TranscriptionError::EmptyAudio);
        }

        debug!(
            "Dispatching {} bytes of audio to '{}' (timeout: {:?})",
            wav_bytes.len(),
            self.backend.backend_name(),
            self.timeout
        );

        match tokio::time::timeout(self.timeout, self.backend.transcribe(wav_bytes)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    "Transcription backend '{}' exceeded {}s timeout",
                    self.backend.backend_name(),
                    self.timeout.as_secs()
                );
                Err(TranscriptionError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Backend stub that returns a canned transcript after an optional delay.
    struct StubBackend {
        delay: Duration,
        text: String,
    }

    #[async_trait]
    impl Transcriber for StubBackend {
        async fn transcribe(&self, _wav_bytes: &[u8]) -> Result<Transcript, TranscriptionError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(Transcript {
                text: self.text.clone(),
                segments: Vec::new(),
                confidence: Some(0.9),
                duration_seconds: 2.0,
            })
        }

        fn backend_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_gateway_passes_through_success() {
        let gateway = TranscriptionGateway::new(
            Arc::new(StubBackend {
                delay: Duration::ZERO,
                text: "I would start by clarifying requirements".to_string(),
            }),
            Duration::from_secs(5),
        );

        let transcript = gateway.transcribe(&[0u8; 64]).await.unwrap();
        assert_eq!(transcript.text, "I would start by clarifying requirements");
    }

    #[tokio::test]
    async fn test_gateway_rejects_empty_audio() {
        let gateway = TranscriptionGateway::new(
            Arc::new(StubBackend {
                delay: Duration::ZERO,
                text: String::new(),
            }),
            Duration::from_secs(5),
        );

        let result = gateway.transcribe(&[]).await;
        assert!(matches!(result, Err(TranscriptionError::EmptyAudio)));
    }

    #[tokio::test]
    async fn test_gateway_enforces_timeout() {
        // Backend takes far longer than the gateway allows
        let gateway = TranscriptionGateway::new(
            Arc::new(StubBackend {
                delay: Duration::from_secs(30),
                text: "too late".to_string(),
            }),
            Duration::from_millis(50),
        );

        let result = gateway.transcribe(&[0u8; 64]).await;
        assert!(matches!(result, Err(TranscriptionError::Timeout(_))));
    }
}
