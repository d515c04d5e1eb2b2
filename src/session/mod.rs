//! # Session Module
//!
//! The heart of the service: per-question lifecycle tracking for one
//! interview connection. Everything else in the repository either feeds this
//! module (audio buffering, format conversion, transcription) or consumes
//! its output (persistence, the REST surface, the downstream evaluation
//! service).
//!
//! ## Key Components:
//! - **QuestionSegment / SessionAggregate**: The data model, mirroring the
//!   durable record other services depend on
//! - **StreamSession**: The state machine - a pure, transport-free
//!   transition core driven by the WebSocket actor
//! - **FinalizePipeline**: convert -> transcribe -> metrics, run off the
//!   connection's event loop at every question boundary
//! - **SessionRegistry**: Injected bookkeeping of live connections; enforces
//!   one connection per session id and the concurrent-session cap

pub mod aggregate;
pub mod finalize;
pub mod machine;
pub mod registry;
pub mod segment;

pub use aggregate::SessionAggregate;
pub use finalize::FinalizePipeline;
pub use machine::{Effect, FinalizeJob, FinalizedQuestion, SessionLimits, StreamSession, Transition};
pub use registry::{RegistryError, SessionRegistry};
pub use segment::{ActiveQuestion, QuestionSegment};
