use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{LearningError, LearningResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // The UI is served from another origin
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest(
            "/api/v1/sessions",
            sessions_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::rate_limit::sessions_rate_limit_middleware,
            )),
        )
        .nest(
            "/api/v1",
            question_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::rate_limit::questions_rate_limit_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::sessions::create_session))
        .route("/{id}", get(handlers::sessions::get_session))
        .route(
            "/{id}/question",
            get(handlers::sessions::get_current_question),
        )
        .route("/{id}/progress", get(handlers::sessions::get_progress))
        .route("/{id}/answers", post(handlers::sessions::submit_answer))
        .route("/{id}/next", post(handlers::sessions::next_question))
        .route("/{id}/complete", post(handlers::sessions::complete_session))
}

fn question_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/questions", get(handlers::questions::list_questions))
        .route(
            "/questions/adaptive",
            get(handlers::questions::adaptive_questions),
        )
        .route("/subjects", get(handlers::questions::list_subjects))
        .route(
            "/users/{id}/progress",
            get(handlers::questions::user_progress),
        )
        .route(
            "/users/{id}/performance",
            get(handlers::questions::user_performance),
        )
}
