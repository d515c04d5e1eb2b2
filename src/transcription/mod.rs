//! # Transcription Module
//!
//! Speech-to-text is an external collaborator of this service: the interview
//! backend never hosts a model itself, it hands canonical WAV audio to a
//! pluggable backend and consumes the resulting transcript.
//!
//! ## Key Components:
//! - **Transcriber trait**: The capability every backend must provide
//! - **TranscriptionGateway**: Timeout-bounded wrapper around a backend; this is
//!   what the finalization pipeline talks to
//! - **HttpTranscriber**: Production backend speaking the whisper-asr-webservice
//!   HTTP API
//!
//! ## Failure Model:
//! Every failure here is *recoverable* from the session's point of view: a
//! failed or timed-out transcription finalizes the question with an empty
//! transcript and an error marker, and the interview continues.

pub mod gateway;
pub mod http;

pub use gateway::TranscriptionGateway;
pub use http::HttpTranscriber;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of transcribing one question's audio.
///
/// ## API Integration:
/// The segment timings feed the pause analysis in the speech metrics; the
/// text feeds everything else. `duration_seconds` is the backend's view of
/// the audio length (best-effort; the pipeline falls back to the WAV header
/// when the backend reports zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// The transcribed text
    pub text: String,

    /// Time-aligned segments, in order
    pub segments: Vec<TranscriptSegment>,

    /// Overall confidence score (0.0 to 1.0), if the backend reports one
    pub confidence: Option<f32>,

    /// Duration of the audio as seen by the backend (seconds)
    pub duration_seconds: f64,
}

/// One time-aligned span of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start offset in seconds from the beginning of the question's audio
    pub start: f64,

    /// End offset in seconds
    pub end: f64,

    /// Text spoken in this span
    pub text: String,
}

/// Errors a transcription backend can produce.
///
/// ## Error Categories:
/// - **EmptyAudio**: Nothing to transcribe (caller should have caught this)
/// - **UnsupportedDuration**: Audio outside what the backend accepts
/// - **Backend**: The backend is unreachable or returned a failure status
/// - **InvalidResponse**: The backend answered but the payload didn't parse
/// - **Timeout**: The bounded call did not complete in time
#[derive(Debug)]
pub enum TranscriptionError {
    EmptyAudio,
    UnsupportedDuration(f64),
    Backend(String),
    InvalidResponse(String),
    Timeout(u64),
}

impl fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionError::EmptyAudio => write!(f, "No audio data to transcribe"),
            TranscriptionError::UnsupportedDuration(secs) => {
                write!(f, "Unsupported audio duration: {:.2}s", secs)
            }
            TranscriptionError::Backend(msg) => write!(f, "Transcription backend error: {}", msg),
            TranscriptionError::InvalidResponse(msg) => {
                write!(f, "Invalid transcription response: {}", msg)
            }
            TranscriptionError::Timeout(secs) => {
                write!(f, "Transcription timed out after {}s", secs)
            }
        }
    }
}

impl std::error::Error for TranscriptionError {}

/// Capability trait for transcription backends.
///
/// ## Contract:
/// Implementations receive canonical WAV bytes (the format converter runs
/// first) and may take several seconds; callers must bound the call with a
/// timeout, which is exactly what [`TranscriptionGateway`] does.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe canonical WAV audio to text.
    async fn transcribe(&self, wav_bytes: &[u8]) -> Result<Transcript, TranscriptionError>;

    /// Human-readable backend name for logging and health reporting.
    fn backend_name(&self) -> &str;
}

impl Transcript {
    /// An empty transcript, used when finalization fails recoverably.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            segments: Vec::new(),
            confidence: None,
            duration_seconds: 0.0,
        }
    }

    /// Number of whitespace-separated words in the transcript.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transcript() {
        let t = Transcript::empty();
        assert!(t.text.is_empty());
        assert!(t.segments.is_empty());
        assert_eq!(t.word_count(), 0);
    }

    #[test]
    fn test_word_count_ignores_extra_whitespace() {
        let t = Transcript {
            text: "  tell me   about yourself ".to_string(),
            segments: Vec::new(),
            confidence: None,
            duration_seconds: 3.0,
        };
        assert_eq!(t.word_count(), 4);
    }

    #[test]
    fn test_transcript_serialization_round_trip() {
        let t = Transcript {
            text: "hello world".to_string(),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 1.5,
                text: "hello world".to_string(),
            }],
            confidence: Some(0.9),
            duration_seconds: 1.5,
        };
        let json = serde_json::to_string(&t).unwrap();
        let back: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }
}
