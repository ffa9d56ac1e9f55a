use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    CounterVec, Encoder, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Cache Metrics (question cache)
    pub static ref CACHE_HIT_RATIO: CounterVec = register_counter_vec!(
        "cache_hit_ratio",
        "Cache hit/miss ratio",
        &["result"]
    )
    .unwrap();

    // Business Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sessions_total",
        "Total number of learning sessions",
        &["status"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sessions_active",
        "Number of currently active sessions"
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    pub static ref DIFFICULTY_ADJUSTMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "difficulty_adjustments_total",
        "Total number of in-session difficulty changes",
        &["direction"]
    )
    .unwrap();

    pub static ref PERSISTENCE_WARNINGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "persistence_warnings_total",
        "Side effects that failed without failing the operation",
        &["kind"]
    )
    .unwrap();

    pub static ref ADAPTIVE_FALLBACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "adaptive_fallbacks_total",
        "Adaptive question selections that fell back to bulk loading",
        &["reason"]
    )
    .unwrap();

    // Rate limiting
    pub static ref RATE_LIMIT_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limit_rejections_total",
        "Requests denied by the rate limiter",
        &["endpoint", "reason"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Record cache hit
pub fn record_cache_hit() {
    CACHE_HIT_RATIO.with_label_values(&["hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss() {
    CACHE_HIT_RATIO.with_label_values(&["miss"]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_metrics_registration() {
        let before = PERSISTENCE_WARNINGS_TOTAL
            .with_label_values(&["analytics_save"])
            .get();
        PERSISTENCE_WARNINGS_TOTAL
            .with_label_values(&["analytics_save"])
            .inc();
        assert_eq!(
            PERSISTENCE_WARNINGS_TOTAL
                .with_label_values(&["analytics_save"])
                .get(),
            before + 1
        );
    }

    #[test]
    fn test_render_metrics() {
        RATE_LIMIT_REJECTIONS_TOTAL
            .with_label_values(&["sessions", "limited"])
            .inc();
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("rate_limit_rejections_total"));
    }

    #[tokio::test]
    async fn test_track_db_operation_passes_result_through() {
        let value = track_db_operation("find", "questions", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(
            DB_OPERATIONS_TOTAL
                .with_label_values(&["find", "questions", "success"])
                .get()
                >= 1
        );
    }
}
