//! # Finalization Pipeline
//!
//! The question-boundary pipeline: convert -> transcribe -> compute metrics.
//! Runs once per question on a task spawned off the connection's event loop,
//! so a slow backend only stalls its own session's protocol progress.
//!
//! ## Failure Model:
//! The pipeline itself never fails: any stage error produces a
//! [`FinalizedQuestion`] with an empty transcript, zero-valued metrics, and
//! an error marker. A single bad question must not block the rest of the
//! interview.

use crate::analysis::{analyze_language, analyze_speech, LanguageMetrics, SpeechMetrics};
use crate::audio::{FormatConverter, SourceFormat};
use crate::session::machine::{FinalizeJob, FinalizedQuestion};
use crate::transcription::TranscriptionGateway;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{info, warn};

/// The convert -> transcribe -> metrics pipeline, shared by all sessions.
#[derive(Clone)]
pub struct FinalizePipeline {
    converter: Arc<dyn FormatConverter>,
    source_format: SourceFormat,
    gateway: TranscriptionGateway,
}

impl FinalizePipeline {
    pub fn new(
        converter: Arc<dyn FormatConverter>,
        source_format: SourceFormat,
        gateway: TranscriptionGateway,
    ) -> Self {
        Self {
            converter,
            source_format,
            gateway,
        }
    }

    /// Name of the transcription backend (health reporting).
    pub fn backend_name(&self) -> &str {
        self.gateway.backend_name()
    }

    /// The source format this deployment expects from clients.
    pub fn source_format(&self) -> SourceFormat {
        self.source_format
    }

    /// Run the full pipeline for one finalization job.
    ///
    /// ## Stages:
    /// 1. **Convert** the buffered source bytes to canonical WAV (CPU-bound,
    ///    runs on the blocking thread pool)
    /// 2. **Transcribe** through the timeout-bounded gateway
    /// 3. **Compute** speech and language metrics from the transcript
    pub async fn run(&self, job: FinalizeJob) -> FinalizedQuestion {
        let question_id = job.question_id;

        // Stage 1: format conversion off the async threads
        let converter = Arc::clone(&self.converter);
        let source_format = self.source_format;
        let audio = job.audio;
        let audio_len = audio.len();

        let wav = match tokio::task::spawn_blocking(move || converter.convert(&audio, source_format))
            .await
        {
            Ok(Ok(wav)) => wav,
            Ok(Err(err)) => {
                return Self::failed(question_id, format!("Audio conversion failed: {}", err))
            }
            Err(err) => {
                // The blocking task itself died; treat like any media failure
                return Self::failed(question_id, format!("Audio conversion failed: {}", err));
            }
        };

        // Stage 2: bounded transcription
        let transcript = match self.gateway.transcribe(&wav).await {
            Ok(transcript) => transcript,
            Err(err) => {
                return Self::failed(question_id, format!("Transcription failed: {}", err))
            }
        };

        // Stage 3: metrics. Duration comes from the backend when it reports
        // one, else from the WAV header, else from the question's wall-clock
        // bounds.
        let mut duration_seconds = transcript.duration_seconds;
        if duration_seconds <= 0.0 {
            duration_seconds = wav_duration_seconds(&wav).unwrap_or(0.0);
        }
        if duration_seconds <= 0.0 {
            duration_seconds =
                (job.ended_at - job.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        }

        let speech_metrics = analyze_speech(&transcript.text, duration_seconds, &transcript.segments);
        let language_metrics = analyze_language(&transcript.text);

        info!(
            "Finalized question '{}': {} source bytes -> {} transcript chars ({} words)",
            question_id,
            audio_len,
            transcript.text.len(),
            speech_metrics.total_words
        );

        FinalizedQuestion {
            question_id,
            transcript: transcript.text,
            speech_metrics,
            language_metrics,
            error: None,
        }
    }

    /// A fully-populated failure outcome: empty transcript, zeroed metrics,
    /// explicit error marker.
    fn failed(question_id: String, error: String) -> FinalizedQuestion {
        warn!("Question '{}' pipeline failure: {}", question_id, error);
        FinalizedQuestion {
            question_id,
            transcript: String::new(),
            speech_metrics: SpeechMetrics::zeroed(),
            language_metrics: LanguageMetrics::zeroed(),
            error: Some(error),
        }
    }
}

/// Audio length according to the WAV header.
fn wav_duration_seconds(wav: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(wav)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}
