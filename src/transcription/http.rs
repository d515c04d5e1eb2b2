//! # HTTP Transcription Backend
//!
//! Speaks the whisper-asr-webservice HTTP API: WAV bytes go out as a
//! multipart upload to `POST {endpoint}/asr`, a JSON document with the text
//! and time-aligned segments comes back. Any OpenAI-Whisper-compatible
//! service exposing that contract works (the reference deployment is
//! onerahmet/openai-whisper-asr-webservice in a sidecar container).

use crate::transcription::{Transcriber, Transcript, TranscriptSegment, TranscriptionError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// HTTP client for a whisper-asr-webservice-compatible backend.
pub struct HttpTranscriber {
    client: Client,
    endpoint: String,
    language: String,
}

/// Wire format of the backend's JSON response.
///
/// Fields beyond `text` are optional in practice (some deployments only
/// return the plain text), so everything else defaults.
#[derive(Debug, Deserialize)]
struct AsrResponse {
    #[serde(default)]
    text: String,

    #[serde(default)]
    segments: Vec<AsrSegment>,
}

#[derive(Debug, Deserialize)]
struct AsrSegment {
    #[serde(default)]
    start: f64,

    #[serde(default)]
    end: f64,

    #[serde(default)]
    text: String,
}

impl HttpTranscriber {
    /// Create a new HTTP backend client.
    ///
    /// ## Parameters:
    /// - **endpoint**: Base URL of the backend (no trailing `/asr`)
    /// - **language**: ISO 639-1 hint passed on every request
    /// - **timeout**: Request timeout; kept in line with the gateway's bound so
    ///   the connection pool doesn't hold sockets for calls the gateway
    ///   already gave up on
    pub fn new(endpoint: String, language: String, timeout: Duration) -> Result<Self, TranscriptionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranscriptionError::Backend(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            language,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav_bytes: &[u8]) -> Result<Transcript, TranscriptionError> {
        let url = format!(
            "{}/asr?task=transcribe&language={}&output=json",
            self.endpoint, self.language
        );

        debug!("POST {} ({} bytes of WAV audio)", url, wav_bytes.len());

        let part = reqwest::multipart::Part::bytes(wav_bytes.to_vec())
            .file_name("answer.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::Backend(format!("Failed to build upload part: {}", e)))?;

        let form = reqwest::multipart::Form::new().part("audio_file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::Backend(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Backend(format!(
                "Backend returned {}: {}",
                status, body
            )));
        }

        let parsed: AsrResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::InvalidResponse(e.to_string()))?;

        let segments: Vec<TranscriptSegment> = parsed
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
            })
            .collect();

        // The backend's notion of duration is the end of the last segment;
        // the pipeline falls back to the WAV header when this is zero.
        let duration_seconds = segments.last().map(|s| s.end).unwrap_or(0.0);

        Ok(Transcript {
            text: parsed.text.trim().to_string(),
            segments,
            confidence: None,
            duration_seconds,
        })
    }

    fn backend_name(&self) -> &str {
        "whisper-asr-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let t = HttpTranscriber::new(
            "http://127.0.0.1:9000/".to_string(),
            "en".to_string(),
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(t.endpoint, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_response_parsing_with_segments() {
        let raw = r#"{
            "text": " Tell me about a project you led. ",
            "segments": [
                {"start": 0.0, "end": 2.4, "text": " Tell me about"},
                {"start": 2.4, "end": 4.1, "text": " a project you led."}
            ],
            "language": "en"
        }"#;
        let parsed: AsrResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.segments.len(), 2);
        assert!((parsed.segments[1].end - 4.1).abs() < f64::EPSILON);
        assert_eq!(parsed.text.trim(), "Tell me about a project you led.");
    }

    #[test]
    fn test_response_parsing_text_only() {
        // Some deployments return just the text field
        let raw = r#"{"text": "short answer"}"#;
        let parsed: AsrResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text, "short answer");
        assert!(parsed.segments.is_empty());
    }
}
