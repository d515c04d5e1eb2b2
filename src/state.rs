//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request handlers
//! and WebSocket connections simultaneously.
//!
//! ## Key Rust Concepts (IMPORTANT for beginners):
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Multiple requests run simultaneously and all need access to the same state
//! - **Thread safety**: Safe to share between threads
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Why needed**: Multiple requests can read config simultaneously, but only one can update it
//!
//! ### Injected collaborators
//! The session registry, session store, and finalization pipeline are
//! constructed once in `main` and injected here - no module-level globals.
//! Tests build an AppState around in-memory implementations and drive it
//! directly.

use crate::config::AppConfig;             // Our configuration types
use crate::session::{FinalizePipeline, SessionRegistry};
use crate::storage::SessionStore;
use std::collections::HashMap;            // For storing per-endpoint metrics
use std::sync::{Arc, RwLock};             // Thread-safe shared ownership and locking
use std::time::Instant;                   // For tracking server uptime

/// The main application state shared across all request handlers.
///
/// ## Thread Safety Pattern:
/// Mutable data (config, metrics) lives behind Arc<RwLock<T>>; the injected
/// collaborators are internally synchronized and shared behind plain Arcs.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,

    /// Live-connection bookkeeping for the streaming endpoint
    pub registry: Arc<SessionRegistry>,

    /// Durable session persistence
    pub store: Arc<dyn SessionStore>,

    /// The convert -> transcribe -> metrics pipeline shared by all sessions
    pub pipeline: Arc<FinalizePipeline>,
}

/// Performance metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Detailed metrics for each API endpoint (URL path)
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

/// Implementation of methods for AppState.
impl AppState {
    /// Create a new AppState with the given configuration and collaborators.
    pub fn new(
        config: AppConfig,
        registry: Arc<SessionRegistry>,
        store: Arc<dyn SessionStore>,
        pipeline: Arc<FinalizePipeline>,
    ) -> Self {
        Self {
            // Wrap config for thread-safe sharing and updating
            config: Arc::new(RwLock::new(config)),
            // Start with empty metrics
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            // Record when the server started
            start_time: Instant::now(),
            registry,
            store,
            pipeline,
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    /// AppConfig is designed to be cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration with validation.
    ///
    /// ## Error handling:
    /// Configuration is validated before updating to ensure it's always valid.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                // Validation passed, update the config
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => {
                // Validation failed, return the error
                Err(e.to_string())
            }
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: The API endpoint (e.g., "GET /health")
    /// - **duration_ms**: How long the request took to process (in milliseconds)
    /// - **is_error**: Whether this request resulted in an error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        // Get or create metrics for this specific endpoint
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        // Update the metrics for this endpoint
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// ## Why a snapshot:
    /// Clones the data so we don't hold the lock while serializing the HTTP
    /// response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Implementation of utility methods for EndpointMetric.
impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no average to calculate
        }
    }

    /// Calculate the error rate for this endpoint as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no errors possible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PcmWavConverter, SourceFormat};
    use crate::storage::MemorySessionStore;
    use crate::transcription::TranscriptionGateway;
    use crate::transcription::{Transcriber, Transcript, TranscriptionError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullBackend;

    #[async_trait]
    impl Transcriber for NullBackend {
        async fn transcribe(&self, _wav: &[u8]) -> Result<Transcript, TranscriptionError> {
            Ok(Transcript::empty())
        }

        fn backend_name(&self) -> &str {
            "null"
        }
    }

    fn state() -> AppState {
        let config = AppConfig::default();
        let pipeline = FinalizePipeline::new(
            Arc::new(PcmWavConverter::new(16000, 1)),
            SourceFormat::Pcm,
            TranscriptionGateway::new(Arc::new(NullBackend), Duration::from_secs(1)),
        );
        AppState::new(
            config,
            Arc::new(SessionRegistry::new(4)),
            Arc::new(MemorySessionStore::new()),
            Arc::new(pipeline),
        )
    }

    #[test]
    fn test_metrics_accounting() {
        let state = state();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.record_endpoint_request("GET /health", 12, false);
        state.record_endpoint_request("GET /health", 8, true);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);

        let endpoint = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(endpoint.request_count, 2);
        assert_eq!(endpoint.average_duration_ms(), 10.0);
        assert_eq!(endpoint.error_rate(), 0.5);
    }

    #[test]
    fn test_config_update_validation() {
        let state = state();

        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        let mut good = state.get_config();
        good.server.port = 9999;
        assert!(state.update_config(good).is_ok());
        assert_eq!(state.get_config().server.port, 9999);
    }
}
