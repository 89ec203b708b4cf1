use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use mpesa_gateway::{
    config::Config,
    handlers::*,
    services::{MpesaService, PaymentStore},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting M-Pesa gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    // Initialize services
    let mpesa = Arc::new(MpesaService::new(&config)?);
    let store = Arc::new(PaymentStore::new());

    // Build application state
    let app_state = AppState {
        mpesa,
        store: store.clone(),
        receiver_number: config.receiver_number.clone(),
        poll_interval: Duration::from_secs(config.poll_interval_secs),
        poll_max_attempts: config.poll_max_attempts,
    };

    let health_state = HealthState {
        store: store.clone(),
        started_at: Instant::now(),
    };

    let governor_conf = Box::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .finish()
            .context("Invalid rate limit configuration")?,
    );

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(health_state)
        .route("/api/payments/stk-push", post(initiate_stk_push))
        .route("/api/payments/:checkout_request_id", get(get_payment))
        .route(
            "/api/payments/:checkout_request_id/query",
            post(query_payment_status),
        )
        .route("/api/payments/callback", post(mpesa_callback))
        .with_state(app_state)
        // Global middleware
        .layer(GovernorLayer {
            config: Box::leak(governor_conf),
        })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);
    tracing::info!("Payment callbacks expected at {}", config.callback_url);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Shutting down gracefully...");
}
