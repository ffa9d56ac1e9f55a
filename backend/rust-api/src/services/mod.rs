use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::store::{InMemoryLearningStore, LearningStore, MongoLearningStore};
use crate::utils::retry::ExponentialBackoff;
use collaborators::StoreCharacterService;
use performance_service::PerformanceService;
use question_service::QuestionService;
use rate_limiter::{RateLimitConfig, RateLimiter};
use session_service::SessionService;

pub mod collaborators;
pub mod difficulty;
pub mod performance_service;
pub mod question_service;
pub mod rate_limiter;
pub mod session_service;

/// Endpoint groups the HTTP rate limiter is configured for.
pub const SESSIONS_ENDPOINT: &str = "sessions";
pub const QUESTIONS_ENDPOINT: &str = "questions";

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LearningStore>,
    pub performance: Arc<PerformanceService>,
    pub questions: Arc<QuestionService>,
    pub sessions: Arc<SessionService>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Connect the configured store backend and wire the services on top.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn LearningStore> = match config.store_backend {
            StoreBackend::Mongo => {
                tracing::info!("Connecting to MongoDB...");
                let client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
                let mongo = client.database(&config.mongo_database);
                let store = MongoLearningStore::new(mongo);
                store.ping().await?;
                tracing::info!("MongoDB connection established successfully");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store: data is lost on restart");
                Arc::new(InMemoryLearningStore::new())
            }
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn LearningStore>) -> Self {
        let performance = Arc::new(PerformanceService::new(store.clone()));
        let questions = Arc::new(
            QuestionService::new(store.clone(), performance.clone())
                .with_cache_ttl(config.learning.cache_ttl()),
        );

        let backoff = Arc::new(ExponentialBackoff::new(config.retry.to_retry_config()));
        let characters = Arc::new(StoreCharacterService::new(store.clone(), backoff));
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            questions.clone(),
            characters,
            config.learning.clone(),
        ));

        let rate_limiter = Arc::new(RateLimiter::new());
        let limits = &config.rate_limit;
        for (endpoint, max_requests) in [
            (SESSIONS_ENDPOINT, limits.sessions_max_requests),
            (QUESTIONS_ENDPOINT, limits.questions_max_requests),
        ] {
            rate_limiter.set_limit(
                endpoint,
                RateLimitConfig {
                    max_requests,
                    window: limits.window(),
                    block_duration: limits.block_duration(),
                },
            );
        }

        Self {
            config,
            store,
            performance,
            questions,
            sessions,
            rate_limiter,
        }
    }
}
