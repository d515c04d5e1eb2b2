//! # WebSocket Protocol Messages
//!
//! The typed wire protocol of the speech streaming endpoint. One connection
//! carries two kinds of traffic:
//!
//! - **JSON control messages** (this module), tagged by a `type` field
//! - **Binary frames**: raw audio chunks for the currently active question
//!
//! ## Message Flow (per question):
//! 1. Client sends `start_question` -> server answers `question_started`
//! 2. Client streams binary audio frames
//! 3. Client sends `end_question` -> server answers `question_ended` with the
//!    final transcript (possibly empty, if transcription failed)
//! 4. After the last question, `end_session` -> `session_ended`
//!
//! Protocol violations never close the connection; they produce an `error`
//! message and leave the session state untouched.

use serde::{Deserialize, Serialize};

/// Control messages the client can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Open a new question segment. The session must be idle.
    #[serde(rename = "start_question")]
    StartQuestion {
        /// Client-chosen id, unique within the session. Generated
        /// (`q_<n>`) when omitted.
        question_id: Option<String>,

        /// The prompt shown to the candidate
        #[serde(default)]
        question_text: String,
    },

    /// Close the active question and trigger finalization.
    #[serde(rename = "end_question")]
    EndQuestion,

    /// Persist the session. Only valid while idle.
    #[serde(rename = "end_session")]
    EndSession,

    /// Liveness probe; answered with `pong`.
    #[serde(rename = "ping")]
    Ping,

    /// Request a side-effect-free session snapshot.
    #[serde(rename = "get_status")]
    GetStatus,
}

/// Messages the server sends back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Connection accepted and the session is ready for control messages
    #[serde(rename = "connected")]
    Connected {
        session_id: String,
        message: String,
    },

    /// A question segment is open and accepting audio
    #[serde(rename = "question_started")]
    QuestionStarted { question_id: String },

    /// A question segment was finalized (successfully or with a recoverable
    /// media failure - in that case `final_transcript` is empty)
    #[serde(rename = "question_ended")]
    QuestionEnded {
        question_id: String,
        final_transcript: String,
        word_count: usize,
    },

    /// The session aggregate was persisted and the session is over
    #[serde(rename = "session_ended")]
    SessionEnded {
        session_id: String,
        total_questions: usize,
    },

    /// Answer to `ping`
    #[serde(rename = "pong")]
    Pong,

    /// Answer to `get_status`
    #[serde(rename = "status")]
    Status {
        session_id: String,
        state: String,
        active_question: Option<String>,
        completed_questions: usize,
        total_chunks: u64,
        total_bytes: u64,
    },

    /// Protocol or persistence error; the connection stays open
    #[serde(rename = "error")]
    Error { message: String },

    /// Non-fatal notice (dropped frames, discarded stray audio, ...)
    #[serde(rename = "warning")]
    Warning { message: String },
}

impl ServerMessage {
    /// Serialize for the wire. Serialization of these variants cannot fail;
    /// a `String` keeps the call sites simple.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Unreachable with the message shapes above, but never panic the
            // connection over a response we failed to encode.
            tracing::error!("Failed to serialize server message: {}", e);
            format!(r#"{{"type":"error","message":"serialization failure: {}"}}"#, e)
        })
    }
}
