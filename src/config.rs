//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, audio ingest, transcription
/// backend, storage, performance) makes it easier to understand and maintain as
/// the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub storage: StorageConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
/// - `port = 8080`: Common development port (production often uses 80 or 443)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Audio ingest configuration for the WebSocket streaming endpoint.
///
/// ## Fields:
/// - `source_format`: Container/encoding the browser sends ("webm", "ogg", "wav", "pcm")
/// - `max_question_bytes`: Per-question buffer cap; frames past it are dropped with a warning
/// - `pending_grace_ms`: How long frames that arrive during finalization wait for the
///   next `start_question` to claim them before being discarded
/// - `sample_rate` / `channels`: Only used by the raw-PCM converter to stamp the WAV header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub source_format: String,
    pub max_question_bytes: usize,
    pub pending_grace_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Transcription backend configuration.
///
/// ## Fields:
/// - `endpoint`: Base URL of the whisper-asr-webservice-compatible backend
/// - `language`: ISO 639-1 language hint passed to the backend
/// - `timeout_seconds`: Hard bound on a single transcription call; a timeout is
///   treated as a recoverable media failure, never a hang
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub endpoint: String,
    pub language: String,
    pub timeout_seconds: u64,
}

/// Session persistence configuration.
///
/// ## Fields:
/// - `data_dir`: Directory for the file-backed session store (one JSON document per session)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

/// Performance tuning configuration.
///
/// ## Tuning guidelines:
/// - Higher concurrent sessions: More simultaneous interviews, but each one holds
///   its buffered audio in memory until question end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,                     // Common development port
            },
            audio: AudioConfig {
                source_format: "webm".to_string(),  // What MediaRecorder produces in browsers
                max_question_bytes: 50 * 1024 * 1024,  // 50MB per question answer
                pending_grace_ms: 2000,
                sample_rate: 16000,   // Whisper's native rate
                channels: 1,          // Mono
            },
            transcription: TranscriptionConfig {
                endpoint: "http://127.0.0.1:9000".to_string(),
                language: "en".to_string(),
                timeout_seconds: 60,
            },
            storage: StorageConfig {
                data_dir: "data/sessions".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,   // Reasonable for most development machines
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_TRANSCRIPTION_ENDPOINT=http://whisper:9000`: Override backend URL
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_SERVER_HOST becomes server.host in the config
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved and can't be used)
    /// - Max concurrent sessions is greater than 0 (must allow at least one session)
    /// - Per-question buffer cap is greater than 0 (must accept some audio)
    /// - Transcription timeout is greater than 0 (a zero timeout would fail every call)
    /// - Transcription endpoint and storage directory are not empty
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.audio.max_question_bytes == 0 {
            return Err(anyhow::anyhow!("Per-question audio buffer cap must be greater than 0"));
        }

        if self.transcription.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Transcription timeout must be greater than 0"));
        }

        if self.transcription.endpoint.is_empty() {
            return Err(anyhow::anyhow!("Transcription endpoint cannot be empty"));
        }

        if self.storage.data_dir.is_empty() {
            return Err(anyhow::anyhow!("Storage data directory cannot be empty"));
        }

        if self.audio.channels == 0 || self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate and channel count must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// This method allows updating only some fields, not the entire configuration.
    /// For example, you can send just `{"transcription": {"timeout_seconds": 30}}`
    /// to change only the timeout.
    ///
    /// ## Rust Concepts:
    /// - **serde_json::Value**: Generic JSON value that can hold any JSON data
    /// - **if let Some(...)**: Only execute if the field exists in the JSON
    /// - **and_then()**: Chain operations that might fail
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        // Parse the JSON string into a generic value
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        // Update server configuration if provided
        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;  // Convert u64 to u16 for port number
            }
        }

        // Update audio ingest configuration if provided
        if let Some(audio) = partial_config.get("audio") {
            if let Some(format) = audio.get("source_format").and_then(|v| v.as_str()) {
                self.audio.source_format = format.to_string();
            }
            if let Some(cap) = audio.get("max_question_bytes").and_then(|v| v.as_u64()) {
                self.audio.max_question_bytes = cap as usize;
            }
            if let Some(grace) = audio.get("pending_grace_ms").and_then(|v| v.as_u64()) {
                self.audio.pending_grace_ms = grace;
            }
        }

        // Update transcription backend configuration if provided
        if let Some(transcription) = partial_config.get("transcription") {
            if let Some(endpoint) = transcription.get("endpoint").and_then(|v| v.as_str()) {
                self.transcription.endpoint = endpoint.to_string();
            }
            if let Some(language) = transcription.get("language").and_then(|v| v.as_str()) {
                self.transcription.language = language.to_string();
            }
            if let Some(timeout) = transcription.get("timeout_seconds").and_then(|v| v.as_u64()) {
                self.transcription.timeout_seconds = timeout;
            }
        }

        // Update performance configuration if provided
        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        // Validate the updated configuration to ensure it's still valid
        self.validate()?;
        Ok(())
    }
}
