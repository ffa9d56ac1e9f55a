use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::LearningError,
    extractors::AppQuery,
    models::{
        AdaptiveQuestionsQuery, AgeRangeQuery, PerformanceQuery, QuestionBatchView, QuestionFilters,
        QuestionView,
    },
    services::{difficulty::calculate_target_difficulty, AppState},
};

pub async fn list_questions(
    State(state): State<Arc<AppState>>,
    AppQuery(filters): AppQuery<QuestionFilters>,
) -> Result<impl IntoResponse, LearningError> {
    filters.validate()?;
    let batch = state.questions.load_questions(&filters).await?;
    Ok(Json(QuestionBatchView::from(&batch)))
}

pub async fn adaptive_questions(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<AdaptiveQuestionsQuery>,
) -> Result<impl IntoResponse, LearningError> {
    query.validate()?;
    let age_range = match query.age_range {
        Some(age_range) => age_range,
        None => state.sessions.resolve_age_range(&query.user_id).await?,
    };

    let questions = state
        .questions
        .get_adaptive_questions(
            &query.user_id,
            age_range,
            query.subject_id.as_deref(),
            query.limit,
        )
        .await?;
    let views: Vec<QuestionView> = questions
        .iter()
        .map(|q| QuestionView::from_question(q, true))
        .collect();
    Ok(Json(views))
}

pub async fn list_subjects(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<AgeRangeQuery>,
) -> Result<impl IntoResponse, LearningError> {
    let subjects = state
        .questions
        .get_subjects_with_counts(query.age_range)
        .await?;
    Ok(Json(subjects))
}

pub async fn user_progress(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    AppQuery(query): AppQuery<AgeRangeQuery>,
) -> Result<impl IntoResponse, LearningError> {
    let progress = state
        .questions
        .get_user_progress_by_subject(&user_id, query.age_range)
        .await?;
    Ok(Json(progress))
}

pub async fn user_performance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    AppQuery(query): AppQuery<PerformanceQuery>,
) -> Result<impl IntoResponse, LearningError> {
    let performance = state
        .performance
        .get_user_performance(&user_id, query.subject_id.as_deref())
        .await?;

    Ok(Json(json!({
        "user_id": user_id,
        "performance": performance,
        "target_difficulty": calculate_target_difficulty(&performance),
    })))
}
