use std::sync::Arc;

use crate::error::{LearningError, LearningResult};
use crate::models::{ResponseRecord, Trend, UserPerformance};
use crate::store::LearningStore;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Number of recent responses the rolling metrics are computed from.
pub const PERFORMANCE_WINDOW: u32 = 20;
/// Size of each half of the trend comparison.
pub const TREND_WINDOW: usize = 5;
const TREND_MARGIN: f64 = 0.1;

pub struct PerformanceService {
    store: Arc<dyn LearningStore>,
    retry: RetryConfig,
}

impl PerformanceService {
    pub fn new(store: Arc<dyn LearningStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Rolling accuracy, difficulty and trend over the user's last 20 answers.
    pub async fn get_user_performance(
        &self,
        user_id: &str,
        subject_id: Option<&str>,
    ) -> LearningResult<UserPerformance> {
        let responses = retry_async_with_config(self.retry.clone(), || {
            self.store
                .recent_responses(user_id, subject_id, Some(PERFORMANCE_WINDOW))
        })
        .await
        .map_err(|e| LearningError::remote("Failed to load recent responses", e))?;

        let performance = summarize_responses(&responses);
        tracing::debug!(
            user_id,
            responses = responses.len(),
            accuracy = performance.accuracy,
            trend = ?performance.recent_trend,
            "Computed user performance"
        );
        Ok(performance)
    }
}

/// Metrics for responses ordered newest first.
pub fn summarize_responses(responses: &[ResponseRecord]) -> UserPerformance {
    if responses.is_empty() {
        return UserPerformance::default();
    }

    let total = responses.len() as f64;
    let correct = responses.iter().filter(|r| r.is_correct).count() as f64;
    let difficulty_sum: f64 = responses.iter().map(|r| f64::from(r.difficulty)).sum();

    let recent = window_accuracy(responses.iter().take(TREND_WINDOW));
    let previous = window_accuracy(responses.iter().skip(TREND_WINDOW).take(TREND_WINDOW));

    UserPerformance {
        accuracy: correct / total,
        average_difficulty: difficulty_sum / total,
        recent_trend: trend_between(recent, previous),
    }
}

fn window_accuracy<'a>(window: impl Iterator<Item = &'a ResponseRecord>) -> Option<f64> {
    let (count, correct) = window.fold((0usize, 0usize), |(count, correct), r| {
        (count + 1, correct + usize::from(r.is_correct))
    });
    (count > 0).then(|| correct as f64 / count as f64)
}

fn trend_between(recent: Option<f64>, previous: Option<f64>) -> Trend {
    match (recent, previous) {
        (Some(recent), Some(previous)) if recent - previous > TREND_MARGIN => Trend::Improving,
        (Some(recent), Some(previous)) if recent - previous < -TREND_MARGIN => Trend::Declining,
        _ => Trend::Stable,
    }
}
