//! # Audio Handling Module
//!
//! Everything between "binary WebSocket frame arrives" and "canonical WAV is
//! handed to the transcription backend" lives here.
//!
//! ## Key Components:
//! - **Audio Buffer**: Append-only per-question byte accumulator
//! - **Format Converter**: Turns buffered source-format bytes into canonical WAV
//!
//! ## Why no streaming decode:
//! Browser MediaRecorder chunks are slices of a compressed container stream;
//! chunk boundaries do not align with codec frame boundaries, so individual
//! chunks are not independently decodable. All decoding is therefore deferred
//! to the question boundary, where the full byte stream is available. The
//! buffer keeps bytes opaque on purpose.

pub mod buffer;       // Per-question byte accumulator
pub mod convert;      // Source format -> canonical WAV conversion

pub use buffer::AudioBuffer;
pub use convert::{ConvertError, FormatConverter, MediaConverter, PcmWavConverter, SourceFormat};
