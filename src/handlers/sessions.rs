//! # Session REST Handlers
//!
//! Read-side access to persisted interview sessions. The streaming endpoint
//! writes the aggregates; these handlers serve them to dashboards and to the
//! downstream evaluation service.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/sessions` - summaries of all stored sessions, newest first.
pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let summaries = state.store.list().await?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "total": summaries.len(),
        "sessions": summaries
    })))
}

/// `GET /api/v1/sessions/{id}` - the full persisted aggregate.
pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();

    match state.store.load(&session_id).await? {
        Some(aggregate) => Ok(HttpResponse::Ok().json(aggregate)),
        None => Err(AppError::NotFound(format!(
            "Session '{}' not found",
            session_id
        ))),
    }
}

/// `GET /api/v1/sessions/{id}/evaluation` - the view the evaluation service
/// consumes: full transcript plus per-question breakdown with metrics.
pub async fn get_session_for_evaluation(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();

    let aggregate = state
        .store
        .load(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", session_id)))?;

    let duration_seconds = match (aggregate.started_at, aggregate.ended_at) {
        (started, Some(ended)) => (ended - started).num_milliseconds().max(0) as f64 / 1000.0,
        _ => 0.0,
    };

    let questions: Vec<serde_json::Value> = aggregate
        .questions
        .iter()
        .map(|q| {
            json!({
                "question_id": q.question_id,
                "question_text": q.question_text,
                "transcript": q.transcript,
                "speech_metrics": q.speech_metrics,
                "language_metrics": q.language_metrics,
                "word_count": q.word_count()
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "session_id": aggregate.session_id,
        "transcript": aggregate.full_transcript,
        "duration_seconds": duration_seconds,
        "total_questions": aggregate.total_questions,
        "questions": questions
    })))
}

/// `DELETE /api/v1/sessions/{id}` - remove a stored session.
pub async fn delete_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();

    if state.store.delete(&session_id).await? {
        Ok(HttpResponse::Ok().json(json!({
            "status": "deleted",
            "session_id": session_id,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })))
    } else {
        Err(AppError::NotFound(format!(
            "Session '{}' not found",
            session_id
        )))
    }
}
