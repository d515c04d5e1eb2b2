//! # Stream Session State Machine
//!
//! Owns one connection's lifecycle: which question is active, where incoming
//! audio lands, when finalization runs, and when the aggregate is persisted.
//!
//! ## Design:
//! The machine is a pure, synchronous transition core:
//!
//! ```text
//! (state, message) -> (state', responses, side-effect jobs)
//! ```
//!
//! It performs no I/O. Blocking work (conversion, transcription, metric
//! computation, persistence) is described by [`Effect`] values; the
//! WebSocket actor runs those off its event loop and feeds the results back
//! through [`StreamSession::complete_finalization`] /
//! [`StreamSession::complete_persistence`]. This keeps the machine
//! unit-testable without a live connection and keeps per-connection message
//! handling strictly serialized.
//!
//! ## States:
//! `Idle` -> `QuestionActive` -> `Finalizing` -> `Idle`, with the terminal
//! `Ended` reachable from `Idle` only. Protocol violations produce an
//! `error` response and leave the state untouched.

use crate::analysis::{LanguageMetrics, SpeechMetrics};
use crate::audio::AudioBuffer;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::aggregate::SessionAggregate;
use crate::session::segment::{ActiveQuestion, QuestionSegment};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle states of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no question open
    Idle,
    /// A question is open and buffering audio
    QuestionActive,
    /// Question closed, finalization pipeline in flight
    Finalizing,
    /// Aggregate persisted; terminal
    Ended,
}

impl SessionState {
    /// Status-string form used in `status` responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::QuestionActive => "question_active",
            SessionState::Finalizing => "finalizing",
            SessionState::Ended => "ended",
        }
    }
}

/// Tunable bounds the machine enforces.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Per-question audio buffer cap (backpressure; the only sanctioned frame drop)
    pub max_question_bytes: usize,

    /// How long frames received during finalization wait to be claimed by
    /// the next `start_question` before being discarded
    pub pending_grace: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_question_bytes: 50 * 1024 * 1024,
            pending_grace: Duration::from_millis(2000),
        }
    }
}

/// Everything the finalization pipeline needs for one question.
///
/// The audio is moved out of the machine here - the closed segment never
/// sees it again, which is what makes frames-during-finalization unable to
/// corrupt it.
#[derive(Debug)]
pub struct FinalizeJob {
    pub question_id: String,
    pub audio: Vec<u8>,
    pub chunk_count: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// What the pipeline hands back. Always fully populated: a failed pipeline
/// run produces an empty transcript, zeroed metrics, and an error marker.
#[derive(Debug)]
pub struct FinalizedQuestion {
    pub question_id: String,
    pub transcript: String,
    pub speech_metrics: SpeechMetrics,
    pub language_metrics: LanguageMetrics,
    pub error: Option<String>,
}

/// Side effects the driving actor must execute.
#[derive(Debug)]
pub enum Effect {
    /// Run convert -> transcribe -> metrics off the event loop, then call
    /// `complete_finalization` with the outcome
    RunFinalization(FinalizeJob),

    /// Persist the sealed aggregate, then call `complete_persistence`
    PersistAggregate(SessionAggregate),
}

/// Result of one transition: responses to send, plus at most one effect.
#[derive(Debug, Default)]
pub struct Transition {
    pub responses: Vec<ServerMessage>,
    pub effect: Option<Effect>,
}

impl Transition {
    fn none() -> Self {
        Self::default()
    }

    fn respond(message: ServerMessage) -> Self {
        Self {
            responses: vec![message],
            effect: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::respond(ServerMessage::Error {
            message: message.into(),
        })
    }

    fn warning(message: impl Into<String>) -> Self {
        Self::respond(ServerMessage::Warning {
            message: message.into(),
        })
    }
}

/// The per-connection state machine.
pub struct StreamSession {
    session_id: String,
    state: SessionState,
    aggregate: SessionAggregate,

    /// The open question, exclusive owner of its audio buffer (at most one)
    active: Option<ActiveQuestion>,

    /// The question whose finalization is in flight (audio already drained)
    finalizing: Option<ActiveQuestion>,

    /// Frames that arrived during finalization, bound to no segment yet
    pending: AudioBuffer,

    /// When the last pending frame arrived (grace-window anchor)
    pending_last_frame: Option<Instant>,

    limits: SessionLimits,
}

impl StreamSession {
    pub fn new(session_id: String, limits: SessionLimits) -> Self {
        let aggregate = SessionAggregate::new(session_id.clone());
        let pending = AudioBuffer::new(limits.max_question_bytes);
        Self {
            session_id,
            state: SessionState::Idle,
            aggregate,
            active: None,
            finalizing: None,
            pending,
            pending_last_frame: None,
            limits,
        }
    }

    /// The greeting sent right after the connection is accepted.
    pub fn hello(&self) -> ServerMessage {
        ServerMessage::Connected {
            session_id: self.session_id.clone(),
            message: "Ready to receive audio and question markers".to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn aggregate(&self) -> &SessionAggregate {
        &self.aggregate
    }

    pub fn is_ended(&self) -> bool {
        self.state == SessionState::Ended
    }

    /// Handle one control message. Strictly in arrival order per connection.
    pub fn handle_control(&mut self, message: ClientMessage) -> Transition {
        match message {
            ClientMessage::StartQuestion {
                question_id,
                question_text,
            } => self.start_question(question_id, question_text),
            ClientMessage::EndQuestion => self.end_question(),
            ClientMessage::EndSession => self.end_session(),
            ClientMessage::Ping => Transition::respond(ServerMessage::Pong),
            ClientMessage::GetStatus => Transition::respond(self.status()),
        }
    }

    /// Handle one binary audio frame.
    pub fn handle_frame(&mut self, data: &[u8]) -> Transition {
        match self.state {
            SessionState::QuestionActive => {
                let active = self
                    .active
                    .as_mut()
                    .expect("QuestionActive state implies an active question");

                match active.buffer.append(data) {
                    Ok(()) => {
                        self.aggregate.record_frame(data.len());
                        Transition::none()
                    }
                    Err(err) => {
                        warn!(
                            "Dropping frame for question '{}' in session '{}': {}",
                            active.question_id, self.session_id, err
                        );
                        Transition::warning(format!("Audio frame dropped: {}", err))
                    }
                }
            }
            SessionState::Finalizing => {
                // The just-closed segment must not be touched; these frames
                // wait for the next start_question to claim them.
                match self.pending.append(data) {
                    Ok(()) => {
                        self.pending_last_frame = Some(Instant::now());
                        Transition::none()
                    }
                    Err(err) => Transition::warning(format!("Audio frame dropped: {}", err)),
                }
            }
            SessionState::Idle => Transition::warning(
                "No active question. Use start_question control message first.",
            ),
            SessionState::Ended => {
                Transition::warning("Session already ended; audio frame ignored.")
            }
        }
    }

    fn start_question(&mut self, question_id: Option<String>, question_text: String) -> Transition {
        match self.state {
            SessionState::Ended => return Transition::error("Session already ended"),
            SessionState::QuestionActive => {
                let current = self.active.as_ref().map(|a| a.question_id.clone());
                return Transition::error(format!(
                    "Question '{}' is still active. Send end_question first.",
                    current.unwrap_or_default()
                ));
            }
            SessionState::Finalizing => {
                return Transition::error(
                    "Previous question is still being finalized. Wait for question_ended.",
                );
            }
            SessionState::Idle => {}
        }

        let question_id = match question_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => self.generate_question_id(),
        };

        if self.aggregate.contains_question(&question_id) {
            return Transition::error(format!(
                "Question id '{}' was already used in this session",
                question_id
            ));
        }

        let mut responses = Vec::new();

        // Frames that raced the previous finalization either belong to this
        // new question (inside the grace window) or to nothing at all.
        let buffer = match self.take_pending() {
            PendingAudio::None => AudioBuffer::new(self.limits.max_question_bytes),
            PendingAudio::Claimed(buffer) => {
                info!(
                    "Question '{}' claims {} early bytes ({} frames) from the grace window",
                    question_id,
                    buffer.len(),
                    buffer.chunk_count()
                );
                self.aggregate.metadata.total_audio_bytes += buffer.len() as u64;
                self.aggregate.metadata.total_chunks += buffer.chunk_count();
                buffer
            }
            PendingAudio::Expired { bytes, chunks } => {
                warn!(
                    "Discarding {} bytes ({} frames) of unclaimed audio in session '{}'",
                    bytes, chunks, self.session_id
                );
                responses.push(ServerMessage::Warning {
                    message: format!(
                        "Discarded {} bytes of audio received between questions",
                        bytes
                    ),
                });
                AudioBuffer::new(self.limits.max_question_bytes)
            }
        };

        info!(
            "Started question '{}' in session '{}'",
            question_id, self.session_id
        );

        self.active = Some(ActiveQuestion::new(
            question_id.clone(),
            question_text,
            buffer,
        ));
        self.state = SessionState::QuestionActive;

        responses.push(ServerMessage::QuestionStarted { question_id });
        Transition {
            responses,
            effect: None,
        }
    }

    fn end_question(&mut self) -> Transition {
        if self.state != SessionState::QuestionActive {
            return Transition::error("No active question to end");
        }

        let mut question = self
            .active
            .take()
            .expect("QuestionActive state implies an active question");

        let audio = question.buffer.drain();
        let chunk_count = question.buffer.chunk_count();
        let ended_at = Utc::now();

        info!(
            "Ending question '{}' in session '{}': {} frames, {} bytes buffered",
            question.question_id,
            self.session_id,
            chunk_count,
            audio.len()
        );

        let job = FinalizeJob {
            question_id: question.question_id.clone(),
            audio,
            chunk_count,
            started_at: question.started_at,
            ended_at,
        };

        self.finalizing = Some(question);
        self.state = SessionState::Finalizing;

        Transition {
            responses: Vec::new(),
            effect: Some(Effect::RunFinalization(job)),
        }
    }

    /// Fold the finalization outcome back into the session.
    ///
    /// ## Atomic append:
    /// The segment record is built fully populated right here and appended
    /// in the same call; there is no observable intermediate. Success and
    /// handled failure take the identical path - only the error marker and
    /// metric values differ.
    pub fn complete_finalization(&mut self, outcome: FinalizedQuestion) -> Transition {
        let question = match self.finalizing.take() {
            Some(q) if q.question_id == outcome.question_id => q,
            Some(q) => {
                // A stale outcome for a question we are no longer finalizing
                // must not corrupt the current one.
                warn!(
                    "Ignoring finalization outcome for '{}' while '{}' is in flight",
                    outcome.question_id, q.question_id
                );
                self.finalizing = Some(q);
                return Transition::none();
            }
            None => {
                warn!(
                    "Ignoring finalization outcome for '{}': no finalization in flight",
                    outcome.question_id
                );
                return Transition::none();
            }
        };

        if let Some(err) = &outcome.error {
            warn!(
                "Question '{}' finalized with media failure: {}",
                outcome.question_id, err
            );
        }

        let segment = QuestionSegment {
            question_id: outcome.question_id.clone(),
            question_text: question.question_text,
            started_at: question.started_at,
            ended_at: Some(Utc::now()),
            transcript: outcome.transcript,
            speech_metrics: Some(outcome.speech_metrics),
            language_metrics: Some(outcome.language_metrics),
            chunk_count: question.buffer.chunk_count(),
            error: outcome.error,
        };

        let word_count = segment.word_count();
        let final_transcript = segment.transcript.clone();
        self.aggregate.append(segment);
        self.state = SessionState::Idle;

        Transition::respond(ServerMessage::QuestionEnded {
            question_id: outcome.question_id,
            final_transcript,
            word_count,
        })
    }

    fn end_session(&mut self) -> Transition {
        match self.state {
            SessionState::QuestionActive | SessionState::Finalizing => {
                return Transition::error(
                    "End the current question before ending the session",
                );
            }
            SessionState::Ended => return Transition::error("Session already ended"),
            SessionState::Idle => {}
        }

        // Audio that never found a question has nowhere to go now.
        self.discard_pending();

        self.aggregate.seal();

        debug!(
            "Sealing session '{}' with {} questions for persistence",
            self.session_id, self.aggregate.total_questions
        );

        Transition {
            responses: Vec::new(),
            effect: Some(Effect::PersistAggregate(self.aggregate.clone())),
        }
    }

    /// Fold the persistence result back into the session.
    ///
    /// ## Retry semantics:
    /// On failure the aggregate stays in memory and the state stays `Idle`,
    /// so the client can retry `end_session` on the same connection without
    /// data loss.
    pub fn complete_persistence(&mut self, result: Result<(), String>) -> Transition {
        match result {
            Ok(()) => {
                if self.state != SessionState::Idle {
                    // A new question was opened while persistence was in
                    // flight; the stored copy exists, but the session goes on.
                    warn!(
                        "Persistence for session '{}' completed in state {:?}; not ending",
                        self.session_id, self.state
                    );
                    return Transition::none();
                }

                self.state = SessionState::Ended;
                info!(
                    "Session '{}' persisted with {} questions",
                    self.session_id, self.aggregate.total_questions
                );
                Transition::respond(ServerMessage::SessionEnded {
                    session_id: self.session_id.clone(),
                    total_questions: self.aggregate.total_questions,
                })
            }
            Err(err) => {
                warn!("Failed to persist session '{}': {}", self.session_id, err);
                Transition::error(format!(
                    "Failed to persist session: {}. Retry end_session to try again.",
                    err
                ))
            }
        }
    }

    /// Side-effect-free snapshot of the session.
    pub fn status(&self) -> ServerMessage {
        let active_question = self
            .active
            .as_ref()
            .or(self.finalizing.as_ref())
            .map(|q| q.question_id.clone());

        ServerMessage::Status {
            session_id: self.session_id.clone(),
            state: self.state.as_str().to_string(),
            active_question,
            completed_questions: self.aggregate.questions.len(),
            total_chunks: self.aggregate.metadata.total_chunks,
            total_bytes: self.aggregate.metadata.total_audio_bytes,
        }
    }

    /// Called by the actor when the transport drops without `end_session`.
    ///
    /// Policy: buffered audio is discarded and nothing is persisted - the
    /// session never reached a question boundary, so there is nothing
    /// trustworthy to finalize.
    pub fn on_disconnect(&mut self) {
        if self.state == SessionState::Ended {
            return;
        }

        let open_question = self
            .active
            .as_ref()
            .or(self.finalizing.as_ref())
            .map(|q| q.question_id.clone());

        if let Some(question_id) = open_question {
            warn!(
                "Session '{}' disconnected mid-question '{}'; discarding buffered audio, aggregate not persisted",
                self.session_id, question_id
            );
        } else {
            info!(
                "Session '{}' disconnected without end_session after {} questions; aggregate not persisted",
                self.session_id,
                self.aggregate.questions.len()
            );
        }

        self.active = None;
        self.finalizing = None;
    }

    /// First unused generated question id (`q_1`, `q_2`, ...).
    fn generate_question_id(&self) -> String {
        let mut n = self.aggregate.questions.len() + 1;
        loop {
            let candidate = format!("q_{}", n);
            if !self.aggregate.contains_question(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Resolve the pending buffer against the grace window.
    fn take_pending(&mut self) -> PendingAudio {
        if self.pending.is_empty() {
            return PendingAudio::None;
        }

        let within_grace = self
            .pending_last_frame
            .map(|at| at.elapsed() <= self.limits.pending_grace)
            .unwrap_or(false);

        let buffer = std::mem::replace(
            &mut self.pending,
            AudioBuffer::new(self.limits.max_question_bytes),
        );
        self.pending_last_frame = None;

        if within_grace {
            PendingAudio::Claimed(buffer)
        } else {
            PendingAudio::Expired {
                bytes: buffer.len(),
                chunks: buffer.chunk_count(),
            }
        }
    }

    /// Drop any pending audio regardless of the grace window (session end).
    fn discard_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let buffer = std::mem::replace(
            &mut self.pending,
            AudioBuffer::new(self.limits.max_question_bytes),
        );
        self.pending_last_frame = None;

        warn!(
            "Session '{}' ending with {} bytes of unclaimed audio; discarding",
            self.session_id,
            buffer.len()
        );
    }
}

/// What became of the pending buffer when a claim point was reached.
enum PendingAudio {
    None,
    Claimed(AudioBuffer),
    Expired { bytes: usize, chunks: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SessionLimits {
        SessionLimits {
            max_question_bytes: 1024,
            pending_grace: Duration::from_secs(60),
        }
    }

    fn machine() -> StreamSession {
        StreamSession::new("session-1".to_string(), limits())
    }

    fn start(m: &mut StreamSession, id: &str) -> Transition {
        m.handle_control(ClientMessage::StartQuestion {
            question_id: Some(id.to_string()),
            question_text: format!("prompt for {}", id),
        })
    }

    /// Drive end_question and return the finalization job it emitted.
    fn end_question(m: &mut StreamSession) -> FinalizeJob {
        let transition = m.handle_control(ClientMessage::EndQuestion);
        match transition.effect {
            Some(Effect::RunFinalization(job)) => job,
            other => panic!("expected RunFinalization effect, got {:?}", other),
        }
    }

    /// Simulate a successful pipeline run for the given job.
    fn finalize_ok(m: &mut StreamSession, job: &FinalizeJob, transcript: &str) -> Transition {
        m.complete_finalization(FinalizedQuestion {
            question_id: job.question_id.clone(),
            transcript: transcript.to_string(),
            speech_metrics: SpeechMetrics::zeroed(),
            language_metrics: LanguageMetrics::zeroed(),
            error: None,
        })
    }

    /// Simulate a failed pipeline run (media failure).
    fn finalize_err(m: &mut StreamSession, job: &FinalizeJob, error: &str) -> Transition {
        m.complete_finalization(FinalizedQuestion {
            question_id: job.question_id.clone(),
            transcript: String::new(),
            speech_metrics: SpeechMetrics::zeroed(),
            language_metrics: LanguageMetrics::zeroed(),
            error: Some(error.to_string()),
        })
    }

    fn first_error(t: &Transition) -> &str {
        t.responses
            .iter()
            .find_map(|r| match r {
                ServerMessage::Error { message } => Some(message.as_str()),
                _ => None,
            })
            .expect("expected an error response")
    }

    // The happy path: start, three chunks, end -> question_ended with the
    // transcript and chunk_count == 3.
    #[test]
    fn test_full_question_round_trip() {
        let mut m = machine();
        start(&mut m, "q1");

        assert!(m.handle_frame(&[0u8; 10]).responses.is_empty());
        assert!(m.handle_frame(&[0u8; 10]).responses.is_empty());
        assert!(m.handle_frame(&[0u8; 5]).responses.is_empty());

        let job = end_question(&mut m);
        assert_eq!(job.audio.len(), 25);
        assert_eq!(job.chunk_count, 3);
        assert_eq!(m.state(), SessionState::Finalizing);

        let transition = finalize_ok(&mut m, &job, "I would use an index");
        match &transition.responses[0] {
            ServerMessage::QuestionEnded {
                question_id,
                final_transcript,
                word_count,
            } => {
                assert_eq!(question_id, "q1");
                assert_eq!(final_transcript, "I would use an index");
                assert_eq!(*word_count, 5);
            }
            other => panic!("expected question_ended, got {:?}", other),
        }

        assert_eq!(m.state(), SessionState::Idle);
        let segment = &m.aggregate().questions[0];
        assert_eq!(segment.chunk_count, 3);
        assert!(segment.succeeded());
    }

    // A second start_question while one is active is rejected and the
    // state is unchanged: at most one open segment, ever.
    #[test]
    fn test_second_start_rejected_while_active() {
        let mut m = machine();
        start(&mut m, "q1");

        let transition = start(&mut m, "q2");
        assert!(first_error(&transition).contains("q1"));
        assert_eq!(m.state(), SessionState::QuestionActive);

        // The original question still works normally afterwards
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);
        assert_eq!(job.question_id, "q1");
    }

    // Starting during finalization is also rejected.
    #[test]
    fn test_start_rejected_while_finalizing() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);

        let transition = start(&mut m, "q2");
        assert!(first_error(&transition).contains("finalized"));
        assert_eq!(m.state(), SessionState::Finalizing);

        // After the outcome lands, the next question can start
        finalize_ok(&mut m, &job, "done");
        let transition = start(&mut m, "q2");
        assert!(matches!(
            transition.responses.last(),
            Some(ServerMessage::QuestionStarted { .. })
        ));
    }

    // Duplicate question ids are rejected and the aggregate unchanged.
    #[test]
    fn test_duplicate_question_id_rejected() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);
        finalize_ok(&mut m, &job, "first answer");

        let transition = start(&mut m, "q1");
        assert!(first_error(&transition).contains("already used"));
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(m.aggregate().questions.len(), 1);
    }

    // A media failure finalizes the segment with an empty transcript and
    // an error marker; the session continues.
    #[test]
    fn test_media_failure_is_recoverable() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 8]);
        let job = end_question(&mut m);

        let transition = finalize_err(&mut m, &job, "Transcription timed out after 60s");
        match &transition.responses[0] {
            ServerMessage::QuestionEnded {
                final_transcript,
                word_count,
                ..
            } => {
                assert_eq!(final_transcript, "");
                assert_eq!(*word_count, 0);
            }
            other => panic!("expected question_ended, got {:?}", other),
        }

        assert_eq!(m.state(), SessionState::Idle);
        let segment = &m.aggregate().questions[0];
        assert!(!segment.succeeded());
        assert!(segment.speech_metrics.as_ref().unwrap().total_words == 0);

        // The next question succeeds normally
        start(&mut m, "q2");
        m.handle_frame(&[0u8; 8]);
        let job = end_question(&mut m);
        finalize_ok(&mut m, &job, "second answer works");
        assert!(m.aggregate().questions[1].succeeded());
    }

    // Two questions then end_session -> the persisted aggregate holds both
    // segments in start order, and session_ended arrives after persistence.
    #[test]
    fn test_end_session_persists_ordered_aggregate() {
        let mut m = machine();

        for (id, answer) in [("q1", "first answer"), ("q2", "second answer")] {
            start(&mut m, id);
            m.handle_frame(&[0u8; 16]);
            let job = end_question(&mut m);
            finalize_ok(&mut m, &job, answer);
        }

        let transition = m.handle_control(ClientMessage::EndSession);
        let aggregate = match transition.effect {
            Some(Effect::PersistAggregate(a)) => a,
            other => panic!("expected PersistAggregate, got {:?}", other),
        };

        assert_eq!(aggregate.total_questions, 2);
        assert_eq!(aggregate.questions[0].question_id, "q1");
        assert_eq!(aggregate.questions[1].question_id, "q2");
        assert_eq!(aggregate.full_transcript, "first answer second answer");
        assert!(aggregate.ended_at.is_some());

        // Not ended until the store confirms
        assert_eq!(m.state(), SessionState::Idle);
        let transition = m.complete_persistence(Ok(()));
        assert!(matches!(
            transition.responses[0],
            ServerMessage::SessionEnded {
                total_questions: 2,
                ..
            }
        ));
        assert!(m.is_ended());
    }

    // end_session while a question is active is rejected and nothing is
    // persisted.
    #[test]
    fn test_end_session_rejected_while_active() {
        let mut m = machine();
        start(&mut m, "q1");

        let transition = m.handle_control(ClientMessage::EndSession);
        assert!(first_error(&transition).contains("current question"));
        assert!(transition.effect.is_none());
        assert_eq!(m.state(), SessionState::QuestionActive);
    }

    #[test]
    fn test_end_session_rejected_while_finalizing() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 4]);
        let _job = end_question(&mut m);

        let transition = m.handle_control(ClientMessage::EndSession);
        assert!(transition.effect.is_none());
        assert_eq!(m.state(), SessionState::Finalizing);
    }

    // A persistence failure keeps the aggregate and allows a retry.
    #[test]
    fn test_persistence_failure_allows_retry() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);
        finalize_ok(&mut m, &job, "answer");

        let transition = m.handle_control(ClientMessage::EndSession);
        assert!(matches!(
            transition.effect,
            Some(Effect::PersistAggregate(_))
        ));

        let transition = m.complete_persistence(Err("store unavailable".to_string()));
        assert!(first_error(&transition).contains("store unavailable"));
        assert!(!m.is_ended());

        // Retry succeeds and reaches the terminal state
        let transition = m.handle_control(ClientMessage::EndSession);
        assert!(matches!(
            transition.effect,
            Some(Effect::PersistAggregate(_))
        ));
        m.complete_persistence(Ok(()));
        assert!(m.is_ended());
    }

    // Frames outside any question produce a warning and are not buffered.
    #[test]
    fn test_frame_while_idle_warns() {
        let mut m = machine();
        let transition = m.handle_frame(&[0u8; 4]);
        assert!(matches!(
            transition.responses[0],
            ServerMessage::Warning { .. }
        ));
        assert_eq!(m.aggregate().metadata.total_chunks, 0);
    }

    // Frames during finalization are claimed by the next question inside
    // the grace window.
    #[test]
    fn test_pending_frames_claimed_within_grace() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);

        // These arrive while q1 is finalizing
        m.handle_frame(&[1u8; 6]);
        m.handle_frame(&[2u8; 6]);

        finalize_ok(&mut m, &job, "first");
        // q1's record is untouched by the racing frames
        assert_eq!(m.aggregate().questions[0].chunk_count, 1);

        let transition = start(&mut m, "q2");
        // No discard warning: the frames were claimed
        assert_eq!(transition.responses.len(), 1);

        let job = end_question(&mut m);
        assert_eq!(job.audio.len(), 12);
        assert_eq!(job.chunk_count, 2);
    }

    // Frames outside the grace window are discarded with a warning.
    #[test]
    fn test_pending_frames_discarded_after_grace() {
        let mut m = StreamSession::new(
            "session-1".to_string(),
            SessionLimits {
                max_question_bytes: 1024,
                pending_grace: Duration::ZERO,
            },
        );

        start(&mut m, "q1");
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);
        m.handle_frame(&[1u8; 6]);
        finalize_ok(&mut m, &job, "first");

        // Give the zero-length grace window time to lapse
        std::thread::sleep(Duration::from_millis(5));

        let transition = start(&mut m, "q2");
        assert!(matches!(
            transition.responses[0],
            ServerMessage::Warning { .. }
        ));

        let job = end_question(&mut m);
        assert!(job.audio.is_empty());
    }

    // Backpressure: frames past the per-question cap are dropped with a
    // warning and the buffer is unchanged.
    #[test]
    fn test_buffer_cap_drops_frames() {
        let mut m = StreamSession::new(
            "session-1".to_string(),
            SessionLimits {
                max_question_bytes: 8,
                pending_grace: Duration::from_secs(60),
            },
        );

        start(&mut m, "q1");
        assert!(m.handle_frame(&[0u8; 8]).responses.is_empty());

        let transition = m.handle_frame(&[0u8; 1]);
        assert!(matches!(
            transition.responses[0],
            ServerMessage::Warning { .. }
        ));

        let job = end_question(&mut m);
        assert_eq!(job.audio.len(), 8);
        assert_eq!(job.chunk_count, 1);
    }

    #[test]
    fn test_status_snapshot_has_no_side_effects() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 10]);

        let transition = m.handle_control(ClientMessage::GetStatus);
        match &transition.responses[0] {
            ServerMessage::Status {
                state,
                active_question,
                completed_questions,
                total_bytes,
                ..
            } => {
                assert_eq!(state, "question_active");
                assert_eq!(active_question.as_deref(), Some("q1"));
                assert_eq!(*completed_questions, 0);
                assert_eq!(*total_bytes, 10);
            }
            other => panic!("expected status, got {:?}", other),
        }
        assert_eq!(m.state(), SessionState::QuestionActive);
    }

    #[test]
    fn test_ping_pong() {
        let mut m = machine();
        let transition = m.handle_control(ClientMessage::Ping);
        assert!(matches!(transition.responses[0], ServerMessage::Pong));
    }

    #[test]
    fn test_generated_question_ids_skip_used_ones() {
        let mut m = machine();
        start(&mut m, "q_1");
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);
        finalize_ok(&mut m, &job, "answer");

        // No id supplied: q_1 is taken, so q_2 is generated
        let transition = m.handle_control(ClientMessage::StartQuestion {
            question_id: None,
            question_text: String::new(),
        });
        match transition.responses.last() {
            Some(ServerMessage::QuestionStarted { question_id }) => {
                assert_eq!(question_id, "q_2")
            }
            other => panic!("expected question_started, got {:?}", other),
        }
    }

    // A stale finalization outcome cannot touch the aggregate.
    #[test]
    fn test_stale_finalization_outcome_ignored() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 4]);
        let job = end_question(&mut m);

        let stale = FinalizedQuestion {
            question_id: "bogus".to_string(),
            transcript: "should not appear".to_string(),
            speech_metrics: SpeechMetrics::zeroed(),
            language_metrics: LanguageMetrics::zeroed(),
            error: None,
        };
        let transition = m.complete_finalization(stale);
        assert!(transition.responses.is_empty());
        assert!(m.aggregate().questions.is_empty());
        assert_eq!(m.state(), SessionState::Finalizing);

        // The real outcome still lands
        finalize_ok(&mut m, &job, "real answer");
        assert_eq!(m.aggregate().questions.len(), 1);
    }

    // Open question policy: disconnect discards, never persists.
    #[test]
    fn test_disconnect_discards_open_question() {
        let mut m = machine();
        start(&mut m, "q1");
        m.handle_frame(&[0u8; 16]);

        m.on_disconnect();
        assert!(!m.is_ended());
        assert!(m.aggregate().questions.is_empty());
        assert!(m.aggregate().ended_at.is_none());
    }

    #[test]
    fn test_messages_after_session_end_rejected() {
        let mut m = machine();
        let transition = m.handle_control(ClientMessage::EndSession);
        assert!(matches!(
            transition.effect,
            Some(Effect::PersistAggregate(_))
        ));
        m.complete_persistence(Ok(()));
        assert!(m.is_ended());

        let transition = start(&mut m, "q1");
        assert!(first_error(&transition).contains("already ended"));

        let transition = m.handle_control(ClientMessage::EndSession);
        assert!(first_error(&transition).contains("already ended"));
    }
}
