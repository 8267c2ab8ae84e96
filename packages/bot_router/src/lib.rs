//! On-demand reverse proxy for named terminal sessions.
//!
//! Requests for `/<bot_name>/...` are authorized, resolved against the
//! session directory, and forwarded to a bridge process on a loopback port.
//! The bridge is started on first use and reused while it stays alive.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod launcher;
pub mod metrics;
pub mod proxy;
pub mod readiness;
pub mod registry;
pub mod views;

#[cfg(test)]
mod test_helpers;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::directory::SessionDirectory;
use crate::metrics::RouterMetrics;
use crate::proxy::HttpClient;
use crate::readiness::ReadinessProbe;
use crate::registry::InstanceRegistry;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
    pub directory: SessionDirectory,
    pub auth: Arc<AuthGate>,
    pub readiness: ReadinessProbe,
    pub http_client: HttpClient,
    pub metrics: Arc<RouterMetrics>,
}

impl AppState {
    pub fn new(
        registry: InstanceRegistry,
        directory: SessionDirectory,
        auth: AuthGate,
        readiness: ReadinessProbe,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            directory,
            auth: Arc::new(auth),
            readiness,
            http_client: proxy::http_client(),
            metrics: Arc::new(RouterMetrics::new()),
        }
    }
}

/// Custom span maker that includes a unique request ID for tracing
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

/// Build the router: reserved `/_router/*` endpoints, everything else dispatched
/// to bridges.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/_router/health", get(handlers::health_handler))
        .route("/_router/metrics", get(handlers::metrics_handler))
        .fallback(handlers::dispatch)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .with_state(state)
}
