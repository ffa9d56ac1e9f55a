use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::LearningError,
    extractors::AppJson,
    models::{CreateSessionRequest, SubmitAnswerRequest},
    services::AppState,
};

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, LearningError> {
    req.validate()?;
    tracing::info!(
        "Creating session for user_id={}, subject_id={:?}",
        req.user_id,
        req.subject_id
    );

    let session = state
        .sessions
        .create_session(
            &req.user_id,
            req.subject_id.as_deref(),
            req.world_id.as_deref(),
            req.config,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, LearningError> {
    let session = state
        .sessions
        .get_session(&session_id)
        .await
        .ok_or(LearningError::SessionNotFound(session_id))?;
    Ok(Json(session))
}

pub async fn get_current_question(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, LearningError> {
    let question = state
        .sessions
        .get_current_question(&session_id)
        .await
        .ok_or(LearningError::SessionNotFound(session_id))?;
    Ok(Json(question))
}

pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, LearningError> {
    let progress = state
        .sessions
        .get_progress(&session_id)
        .await
        .ok_or(LearningError::SessionNotFound(session_id))?;
    Ok(Json(progress))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, LearningError> {
    req.validate()?;
    tracing::info!("Submitting answer for session: {}", session_id);

    let outcome = state
        .sessions
        .submit_answer(&session_id, &req.selected_answer, req.response_time_seconds)
        .await?;
    Ok(Json(outcome))
}

pub async fn next_question(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, LearningError> {
    let outcome = state.sessions.next_question(&session_id).await?;
    Ok(Json(outcome))
}

pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, LearningError> {
    tracing::info!("Completing session: {}", session_id);
    let summary = state.sessions.complete_session(&session_id).await?;
    Ok(Json(summary))
}
