use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;
use crate::registry::Liveness;

/// Health check endpoint - router status and bridge counts
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let instances = state.registry.list().await;
    let alive = instances
        .iter()
        .filter(|i| i.liveness == Liveness::Alive)
        .count() as u64;
    let snapshot = state.metrics.snapshot();

    let status = if snapshot.errors.directory == 0 && snapshot.errors.spawn == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        bridges: metrics::BridgeHealth {
            total: instances.len() as u64,
            alive,
        },
        active_websockets: snapshot.requests.active_websockets,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - counters since startup
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
