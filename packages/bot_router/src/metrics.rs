//! Router counters for the `/_router/metrics` and `/_router/health` endpoints

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::auth::AuthDecision;
use crate::registry::Ensured;

#[derive(Debug, Default)]
pub struct RouterMetrics {
    // Requests
    pub http_requests: AtomicU64,
    pub websocket_requests: AtomicU64,
    /// Proxied WebSocket connections currently open
    pub active_websockets: AtomicU64,

    // Auth outcomes
    pub allowed_by_token: AtomicU64,
    pub allowed_by_warm_session: AtomicU64,
    pub denied: AtomicU64,

    // Bridges
    pub bridges_spawned: AtomicU64,
    pub bridges_reused: AtomicU64,
    pub readiness_timeouts: AtomicU64,

    // Errors
    pub not_found: AtomicU64,
    pub directory_errors: AtomicU64,
    pub spawn_failures: AtomicU64,
    pub proxy_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_request(&self) {
        self.websocket_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_opened(&self) {
        self.active_websockets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_closed(&self) {
        self.active_websockets.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn auth(&self, decision: AuthDecision) {
        let counter = match decision {
            AuthDecision::Token => &self.allowed_by_token,
            AuthDecision::WarmSession => &self.allowed_by_warm_session,
            AuthDecision::Denied => &self.denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ensured(&self, ensured: Ensured) {
        match ensured {
            Ensured::Spawned { .. } => self.bridges_spawned.fetch_add(1, Ordering::Relaxed),
            Ensured::Reused { .. } | Ensured::Joined { .. } => {
                self.bridges_reused.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    pub fn readiness_timeout(&self) {
        self.readiness_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn directory_error(&self) {
        self.directory_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_error(&self) {
        self.proxy_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            requests: RequestMetrics {
                http: self.http_requests.load(Ordering::Relaxed),
                websocket: self.websocket_requests.load(Ordering::Relaxed),
                active_websockets: self.active_websockets.load(Ordering::Relaxed),
            },
            auth: AuthMetrics {
                token: self.allowed_by_token.load(Ordering::Relaxed),
                warm_session: self.allowed_by_warm_session.load(Ordering::Relaxed),
                denied: self.denied.load(Ordering::Relaxed),
            },
            bridges: BridgeMetrics {
                spawned: self.bridges_spawned.load(Ordering::Relaxed),
                reused: self.bridges_reused.load(Ordering::Relaxed),
                readiness_timeouts: self.readiness_timeouts.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                not_found: self.not_found.load(Ordering::Relaxed),
                directory: self.directory_errors.load(Ordering::Relaxed),
                spawn: self.spawn_failures.load(Ordering::Relaxed),
                proxy: self.proxy_errors.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests: RequestMetrics,
    pub auth: AuthMetrics,
    pub bridges: BridgeMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub http: u64,
    pub websocket: u64,
    pub active_websockets: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMetrics {
    pub token: u64,
    pub warm_session: u64,
    pub denied: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMetrics {
    pub spawned: u64,
    pub reused: u64,
    pub readiness_timeouts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub not_found: u64,
    pub directory: u64,
    pub spawn: u64,
    pub proxy: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub bridges: BridgeHealth,
    pub active_websockets: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHealth {
    pub total: u64,
    pub alive: u64,
}
