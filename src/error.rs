//! # Error Handling
//!
//! This module defines custom error types and how they're converted to HTTP responses.
//! This is a great example of Rust's powerful error handling system.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces you to handle both success and failure cases
//! - **No exceptions**: Rust doesn't have try/catch, it uses Result instead
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of error
//! - **Data**: Each variant can hold additional information (String, numbers, etc.)
//! - **Pattern matching**: Use `match` to handle different error types
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings
//!
//! ## Why custom errors:
//! Custom error types make it easy to handle different failure scenarios
//! and provide meaningful error messages to API clients. Note that the
//! WebSocket protocol has its own error channel (`error`/`warning` messages,
//! see the protocol module) - AppError only covers the HTTP surface.

use crate::storage::StoreError;
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **Conflict**: Resource is busy or already claimed (409 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::NotFound(format!("Session '{}' not found", id)));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (store failures, I/O issues, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Resource conflict (e.g. a session id already claimed by a live connection)
    Conflict(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

/// Implementation of the Display trait for AppError.
///
/// ## Purpose:
/// This trait defines how errors are formatted as human-readable strings.
/// It's used when you print an error or convert it to a string.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## Purpose:
/// This trait converts our custom errors into HTTP responses that clients can understand.
/// It automatically handles the conversion when an error is returned from a handler.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
/// - Conflict → 409 (Conflict)
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "Session 'abc' not found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        // Map each error type to HTTP status code, error type, and message
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (
                actix_web::http::StatusCode::CONFLICT,  // 409
                "conflict",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
        };

        // Build the HTTP response with JSON body
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// ## Usage:
/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Automatic conversion from JSON parsing errors to AppError.
///
/// ## Why BadRequest:
/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they should result in a 400 (Bad Request) response, not a 500 (Internal Server Error).
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Automatic conversion from configuration errors to AppError.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - Required environment variables are missing
/// - Configuration values fail validation
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Automatic conversion from session-store errors to AppError.
///
/// ## Mapping:
/// Invalid session ids are the caller's fault (400); everything else
/// (I/O, serialization) is a server-side problem (500).
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidId(msg) => AppError::BadRequest(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Usage Example:
/// ```rust,ignore
/// fn load_config() -> AppResult<AppConfig> {
///     // This is equivalent to: fn load_config() -> Result<AppConfig, AppError>
///     AppConfig::load()
/// }
/// ```
pub type AppResult<T> = Result<T, AppError>;
