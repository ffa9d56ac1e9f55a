use serde::Deserialize;
use std::{env, str::FromStr, time::Duration};

use crate::models::session::{
    DEFAULT_ADJUSTMENT_THRESHOLD, DEFAULT_QUESTIONS_PER_SESSION, INITIAL_DIFFICULTY,
};
use crate::models::AgeRange;
use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(format!("Unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningSettings {
    pub questions_per_session: u32,
    pub adjustment_threshold: u32,
    pub initial_difficulty: u8,
    pub session_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub cache_ttl_seconds: u64,
    /// Bracket used when a user has no recorded age.
    pub default_age_range: AgeRange,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            questions_per_session: DEFAULT_QUESTIONS_PER_SESSION,
            adjustment_threshold: DEFAULT_ADJUSTMENT_THRESHOLD,
            initial_difficulty: INITIAL_DIFFICULTY,
            session_ttl_seconds: 2 * 60 * 60,
            cleanup_interval_seconds: 5 * 60,
            cache_ttl_seconds: 5 * 60,
            default_age_range: AgeRange::Primary,
        }
    }
}

impl LearningSettings {
    pub fn session_ttl(&self) -> chrono::Duration {
        i64::try_from(self.session_ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub sessions_max_requests: u32,
    pub questions_max_requests: u32,
    pub window_seconds: u64,
    pub block_seconds: Option<u64>,
    pub sweep_interval_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sessions_max_requests: 120,
            questions_max_requests: 60,
            window_seconds: 60,
            block_seconds: None,
            sweep_interval_seconds: 5 * 60,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds.max(1))
    }

    pub fn block_duration(&self) -> Option<Duration> {
        self.block_seconds.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

/// Backoff policy for collaborator calls (XP awards, character lookups).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let remote = RetryConfig::remote();
        Self {
            max_attempts: remote.max_attempts,
            base_delay_ms: remote.base_backoff.as_millis() as u64,
            max_delay_ms: remote.max_backoff.as_millis() as u64,
            jitter_ms: remote
                .jitter_max
                .map(|j| j.as_millis() as u64)
                .unwrap_or_default(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.base_delay_ms),
            max_backoff: Duration::from_millis(self.max_delay_ms),
            jitter_max: (self.jitter_ms > 0).then(|| Duration::from_millis(self.jitter_ms)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub learning: LearningSettings,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Mongo,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "questtutor".to_string(),
            bind_addr: "0.0.0.0:8081".to_string(),
            learning: LearningSettings::default(),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Config {
    /// Configuration for a process-local store, used by tests and local runs.
    pub fn in_memory() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the crate-local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml + APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let store_backend = match settings
            .get_string("store.backend")
            .or_else(|_| env::var("STORE_BACKEND"))
        {
            Ok(value) => value.parse().map_err(config::ConfigError::Message)?,
            Err(_) => defaults.store_backend,
        };

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        Ok(Config {
            store_backend,
            mongo_uri,
            mongo_database,
            bind_addr,
            learning: section(&settings, "learning")?,
            rate_limit: section(&settings, "rate_limit")?,
            retry: section(&settings, "retry")?,
        })
    }
}

/// A missing section means defaults; a malformed one is an error.
fn section<T>(settings: &config::Config, key: &str) -> Result<T, config::ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match settings.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(e),
    }
}
