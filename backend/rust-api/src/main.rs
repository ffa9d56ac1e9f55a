use anyhow::Context;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use questtutor_api::{config::Config, create_router, services::AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OpenTelemetry export is optional: enabled only when an OTLP endpoint is set
    let provider = init_telemetry();
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("questtutor-api")));

    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "questtutor_api=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .with(otel_layer)
        .init();

    tracing::info!("Starting QuestTutor learning API");

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for environment: {:?} (store: {:?})",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
        config.store_backend
    );

    let bind_addr = config.bind_addr.clone();
    let cleanup_every = config.learning.cleanup_interval();
    let sweep_every = config.rate_limit.sweep_interval();

    let app_state = Arc::new(
        AppState::new(config)
            .await
            .context("Failed to initialize application state")?,
    );

    // Periodic maintenance: expired sessions and stale question cache entries
    let maintenance_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        loop {
            interval.tick().await;
            maintenance_state.sessions.cleanup_expired_sessions().await;
            let pruned = maintenance_state.questions.prune_cache();
            if pruned > 0 {
                tracing::debug!("Pruned {} question cache entries", pruned);
            }
        }
    });
    app_state.rate_limiter.clone().spawn_sweeper(sweep_every);

    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("Server error")?;

    if let Some(provider) = provider {
        tracing::info!("Shutting down OpenTelemetry");
        if let Err(e) = provider.shutdown() {
            eprintln!("OpenTelemetry shutdown failed: {}", e);
        }
    }

    Ok(())
}

fn init_telemetry() -> Option<SdkTracerProvider> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("WARNING: OpenTelemetry exporter disabled: {}", e);
            return None;
        }
    };

    let resource = Resource::builder_empty()
        .with_service_name("questtutor-api")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    Some(provider)
}
