//! # Interview Speech Backend - Main Application Entry Point
//!
//! This is the main entry point for the interview-speech-backend web server.
//! It sets up an Actix-web HTTP server with the following key features:
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous for better performance
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Error handling using Rust's Result type
//! - **Arc & RwLock**: Thread-safe shared state management
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **state**: Shared application state and request metrics
//! - **session**: The per-question streaming state machine and its collaborators
//! - **audio**: Audio buffering and format conversion
//! - **transcription**: The speech-to-text backend interface
//! - **analysis**: Speech and language metric calculators
//! - **storage**: Durable session persistence
//! - **websocket**: The live streaming endpoint (`/ws/speech/{session_id}`)
//! - **handlers**: REST handlers for config and stored sessions

// Module declarations - These tell Rust about our other source files
mod analysis;      // Speech/language metric calculators (analysis/ directory)
mod audio;         // Audio buffering and conversion (audio/ directory)
mod config;        // Configuration management (config.rs)
mod error;         // Error handling types (error.rs)
mod handlers;      // HTTP request handlers (handlers/ directory)
mod health;        // Health check endpoints (health.rs)
mod middleware;    // Custom middleware (middleware/ directory)
mod protocol;      // WebSocket message types (protocol.rs)
mod session;       // Session state machine and registry (session/ directory)
mod state;         // Application state management (state.rs)
mod storage;       // Session persistence (storage/ directory)
mod transcription; // Transcription backend interface (transcription/ directory)
mod websocket;     // WebSocket streaming endpoint (websocket.rs)

// External crate imports - These are dependencies from Cargo.toml
use actix_cors::Cors;  // Cross-Origin Resource Sharing support
use actix_web::{web, App, HttpServer, middleware::Logger};  // Web framework
use anyhow::Result;    // Better error handling with context
use audio::{FormatConverter, MediaConverter, PcmWavConverter, SourceFormat};
use config::AppConfig; // Our custom configuration struct
use session::{FinalizePipeline, SessionRegistry};
use state::AppState;   // Our custom application state
use std::sync::atomic::{AtomicBool, Ordering};  // Thread-safe boolean for shutdown
use std::sync::Arc;
use std::time::Duration;
use storage::FileSessionStore;
use tracing::{info, error};  // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup
use transcription::{HttpTranscriber, TranscriptionGateway};

/// Global shutdown signal that can be accessed from anywhere in the program.
/// AtomicBool is thread-safe, meaning multiple threads can safely read/write to it.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Builds the session collaborators** (registry, store, pipeline)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Set up structured logging (tracing) for debugging and monitoring
    init_tracing()?;

    // Load application configuration from config.toml and environment variables
    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-speech-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    // Build the session collaborators once and inject them everywhere -
    // no module-level globals, so tests can construct their own.
    let registry = Arc::new(SessionRegistry::new(
        config.performance.max_concurrent_sessions,
    ));

    let store = Arc::new(FileSessionStore::new(config.storage.data_dir.clone()).await?);

    let source_format: SourceFormat = config
        .audio
        .source_format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let converter: Arc<dyn FormatConverter> = match source_format {
        SourceFormat::Pcm | SourceFormat::Wav => Arc::new(PcmWavConverter::new(
            config.audio.sample_rate,
            config.audio.channels,
        )),
        _ => Arc::new(MediaConverter::new()),
    };

    let timeout = Duration::from_secs(config.transcription.timeout_seconds);
    let transcriber = Arc::new(HttpTranscriber::new(
        config.transcription.endpoint.clone(),
        config.transcription.language.clone(),
        timeout,
    )?);
    let gateway = TranscriptionGateway::new(transcriber, timeout);
    let pipeline = Arc::new(FinalizePipeline::new(converter, source_format, gateway));

    info!(
        "Transcription backend: {} at {} ({} input, {}s timeout)",
        pipeline.backend_name(),
        config.transcription.endpoint,
        source_format,
        config.transcription.timeout_seconds
    );

    // Create the shared application state that all requests can access
    let app_state = AppState::new(config.clone(), registry, store, pipeline);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Set up signal handlers for graceful shutdown (Ctrl+C, SIGTERM, etc.)
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    // Create the HTTP server with all its configuration
    let server = HttpServer::new(move || {
        // Configure CORS so the interview frontend can connect from the browser
        let cors = Cors::default()
            .allow_any_origin()    // Allow requests from any domain
            .allow_any_method()    // Allow GET, POST, PUT, DELETE, etc.
            .allow_any_header()    // Allow any HTTP headers
            .max_age(3600);        // Cache CORS settings for 1 hour

        // Create the main application with all its configuration
        App::new()
            // Share our application state with all request handlers
            .app_data(web::Data::new(app_state.clone()))
            // Add middleware in order (they execute in reverse order for responses)
            .wrap(cors)                                    // Handle CORS
            .wrap(Logger::default())                       // Log HTTP requests
            .wrap(middleware::MetricsMiddleware)           // Collect performance metrics
            .wrap(middleware::RequestLogging)              // Custom request logging
            // The live streaming endpoint: one WebSocket per interview session
            .route("/ws/speech/{session_id}", web::get().to(websocket::speech_websocket))
            // Define API routes under /api/v1 prefix
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{id}", web::get().to(handlers::get_session))
                    .route("/sessions/{id}", web::delete().to(handlers::delete_session))
                    .route(
                        "/sessions/{id}/evaluation",
                        web::get().to(handlers::get_session_for_evaluation),
                    )
            )
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?  // Bind to the configured host and port
    .run();             // Start the server (but don't block here)

    // Get a handle to control the server and spawn it in a separate task
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal
    tokio::select! {
        // If the server task finishes (which usually means an error)
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        // If we receive a shutdown signal (Ctrl+C, SIGTERM, etc.)
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;  // Gracefully stop the server
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "interview_speech_backend=debug")
/// - If not set, defaults to "interview_speech_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            // Try to read RUST_LOG environment variable, or use defaults
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_speech_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())  // Format logs nicely for console output
        .init();  // Actually start the logging system

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// ## Why this matters:
/// Graceful shutdown means in-flight finalizations can complete and current
/// requests finish before the process exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        // Set up handlers for different types of shutdown signals
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        // Wait for either signal to arrive
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        // Set the global shutdown flag so other parts of the program know to stop
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
///
/// ## Why polling instead of events:
/// This is a simple polling approach; 100ms of shutdown latency is well
/// within what the deployment tolerates.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        // Sleep for 100ms, then check again
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
