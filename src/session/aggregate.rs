//! # Session Aggregate
//!
//! The ordered collection of finalized question segments plus session-level
//! bounds - the durable artifact the evaluation service consumes. Its JSON
//! shape is a contract: every field here is read by other services and must
//! be preserved field-for-field.

use crate::session::segment::QuestionSegment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Byte/chunk totals carried for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub total_audio_bytes: u64,
    pub total_chunks: u64,
}

/// One complete interview session.
///
/// ## Invariants:
/// - `questions` holds no two segments with the same `question_id`
/// - Segment order is the order in which `start_question` messages were
///   accepted (appends happen in finalization order, which matches because
///   at most one question is ever open)
/// - `full_transcript` and `total_questions` are derived from `questions`
///   and recomputed whenever the aggregate is sealed for persistence
///
/// ## Ownership:
/// Exclusively owned by one connection's state machine until `end_session`
/// hands a copy to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionSegment>,
    pub full_transcript: String,
    pub total_questions: usize,
    pub metadata: SessionMetadata,
}

impl SessionAggregate {
    /// Create an empty aggregate for a new connection.
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            ended_at: None,
            questions: Vec::new(),
            full_transcript: String::new(),
            total_questions: 0,
            metadata: SessionMetadata::default(),
        }
    }

    /// Whether a question id was already used in this session.
    pub fn contains_question(&self, question_id: &str) -> bool {
        self.questions.iter().any(|q| q.question_id == question_id)
    }

    /// Append a finalized segment.
    ///
    /// ## Atomicity:
    /// The only mutation path for `questions`. Callers hand over a
    /// fully-populated [`QuestionSegment`]; a partially-built segment cannot
    /// reach this method by construction.
    pub fn append(&mut self, segment: QuestionSegment) {
        debug_assert!(
            !self.contains_question(&segment.question_id),
            "duplicate question id must be rejected before finalization"
        );
        self.questions.push(segment);
        self.total_questions = self.questions.len();
    }

    /// Record an accepted audio frame in the session totals.
    pub fn record_frame(&mut self, bytes: usize) {
        self.metadata.total_audio_bytes += bytes as u64;
        self.metadata.total_chunks += 1;
    }

    /// Seal the aggregate for persistence: set the end bound and derive the
    /// full transcript (per-question transcripts, segment order, space-joined).
    ///
    /// Calling this again on a retried `end_session` simply recomputes both,
    /// which is what last-write-wins persistence wants.
    pub fn seal(&mut self) {
        self.ended_at = Some(Utc::now());
        self.full_transcript = self
            .questions
            .iter()
            .map(|q| q.transcript.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.total_questions = self.questions.len();
    }

    /// Word count across all finalized transcripts (used by summaries).
    pub fn word_count(&self) -> usize {
        self.questions.iter().map(|q| q.word_count()).sum()
    }
}
