use crate::{models::HealthStatus, services::PaymentStore};
use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<PaymentStore>,
    pub started_at: Instant,
}

pub async fn health_check(State(state): State<HealthState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pending_payments: state.store.pending_count().await,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
