use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors surfaced by the learning core.
///
/// Persistence side effects that fail after the user-facing work succeeded are
/// not errors; they travel as [`crate::models::PersistenceWarning`] instead.
#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{context}: {source:#}")]
    RemoteStore {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid request: {0}")]
    Validation(String),
}

pub type LearningResult<T> = Result<T, LearningError>;

impl LearningError {
    pub fn remote(context: impl Into<String>, source: anyhow::Error) -> Self {
        LearningError::RemoteStore {
            context: context.into(),
            source,
        }
    }

    pub fn no_questions_available() -> Self {
        LearningError::PreconditionFailed("No questions available".to_string())
    }

    pub fn no_current_question() -> Self {
        LearningError::PreconditionFailed("No current question".to_string())
    }

    /// Only remote store failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LearningError::RemoteStore { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LearningError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            LearningError::PreconditionFailed(_) => StatusCode::CONFLICT,
            LearningError::RemoteStore { .. } => StatusCode::SERVICE_UNAVAILABLE,
            LearningError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<validator::ValidationErrors> for LearningError {
    fn from(errors: validator::ValidationErrors) -> Self {
        LearningError::Validation(errors.to_string())
    }
}

impl IntoResponse for LearningError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_statuses() {
        assert_eq!(
            LearningError::SessionNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LearningError::no_questions_available().status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            LearningError::remote("Failed to load questions", anyhow::anyhow!("timeout"))
                .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn only_remote_errors_are_retryable() {
        assert!(LearningError::remote("x", anyhow::anyhow!("y")).is_retryable());
        assert!(!LearningError::no_current_question().is_retryable());
        assert!(!LearningError::SessionNotFound("s".into()).is_retryable());
    }

    #[test]
    fn remote_error_message_keeps_context() {
        let err = LearningError::remote("Failed to load questions", anyhow::anyhow!("socket closed"));
        assert_eq!(err.to_string(), "Failed to load questions: socket closed");
    }
}
