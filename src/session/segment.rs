//! # Question Segments
//!
//! One interview question's lifecycle comes in two shapes with a single
//! irreversible transition between them:
//!
//! - [`ActiveQuestion`]: the open segment, exclusive owner of the audio
//!   buffer, mutated only by appending frames
//! - [`QuestionSegment`]: the finalized, immutable record that lands in the
//!   session aggregate and the persisted document
//!
//! Encoding the transition in the type system is what makes the "no
//! half-written segment is ever visible" guarantee structural: an
//! [`ActiveQuestion`] cannot be appended to the aggregate, and a
//! [`QuestionSegment`] only exists fully populated.

use crate::analysis::{LanguageMetrics, SpeechMetrics};
use crate::audio::AudioBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The currently open question: accepting audio, owning the buffer.
#[derive(Debug)]
pub struct ActiveQuestion {
    /// Unique id within the session (client-supplied or generated)
    pub question_id: String,

    /// The prompt shown to the candidate
    pub question_text: String,

    /// When the question was opened
    pub started_at: DateTime<Utc>,

    /// Exclusive audio accumulator for this question's answer
    pub buffer: AudioBuffer,
}

impl ActiveQuestion {
    pub fn new(question_id: String, question_text: String, buffer: AudioBuffer) -> Self {
        Self {
            question_id,
            question_text,
            started_at: Utc::now(),
            buffer,
        }
    }
}

/// A finalized question: immutable, fully populated, part of the durable record.
///
/// ## Field Notes:
/// - `transcript` is empty when transcription failed; `error` then carries
///   the reason and both metric blocks are zero-valued
/// - `chunk_count` is the number of binary frames received while the
///   question was active (diagnostics and a cheap liveness signal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSegment {
    pub question_id: String,
    pub question_text: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub transcript: String,
    pub speech_metrics: Option<SpeechMetrics>,
    pub language_metrics: Option<LanguageMetrics>,
    pub chunk_count: u64,

    /// Set when finalization hit a recoverable media failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuestionSegment {
    /// Number of whitespace-separated words in the transcript.
    pub fn word_count(&self) -> usize {
        self.transcript.split_whitespace().count()
    }

    /// Whether finalization completed without a media failure.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalized(transcript: &str, error: Option<&str>) -> QuestionSegment {
        QuestionSegment {
            question_id: "q1".to_string(),
            question_text: "Describe X".to_string(),
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            transcript: transcript.to_string(),
            speech_metrics: Some(SpeechMetrics::zeroed()),
            language_metrics: Some(LanguageMetrics::zeroed()),
            chunk_count: 3,
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_word_count() {
        assert_eq!(finalized("I would shard the table", None).word_count(), 5);
        assert_eq!(finalized("", None).word_count(), 0);
    }

    #[test]
    fn test_error_marker_controls_succeeded() {
        assert!(finalized("fine", None).succeeded());
        assert!(!finalized("", Some("Transcription timed out after 60s")).succeeded());
    }

    #[test]
    fn test_error_field_omitted_from_json_when_absent() {
        let json = serde_json::to_string(&finalized("ok", None)).unwrap();
        assert!(!json.contains("\"error\""));

        let json = serde_json::to_string(&finalized("", Some("boom"))).unwrap();
        assert!(json.contains("\"error\":\"boom\""));
    }
}
