use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "audio": {
                "source_format": config.audio.source_format,
                "max_question_bytes": config.audio.max_question_bytes,
                "pending_grace_ms": config.audio.pending_grace_ms,
                "sample_rate": config.audio.sample_rate,
                "channels": config.audio.channels
            },
            "transcription": {
                "endpoint": config.transcription.endpoint,
                "language": config.transcription.language,
                "timeout_seconds": config.transcription.timeout_seconds
            },
            "storage": {
                "data_dir": config.storage.data_dir
            },
            "performance": {
                "max_concurrent_sessions": config.performance.max_concurrent_sessions
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state.update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "audio": {
                "source_format": current_config.audio.source_format,
                "max_question_bytes": current_config.audio.max_question_bytes,
                "pending_grace_ms": current_config.audio.pending_grace_ms
            },
            "transcription": {
                "endpoint": current_config.transcription.endpoint,
                "language": current_config.transcription.language,
                "timeout_seconds": current_config.transcription.timeout_seconds
            },
            "performance": {
                "max_concurrent_sessions": current_config.performance.max_concurrent_sessions
            }
        }
    })))
}
