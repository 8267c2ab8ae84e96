use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bridge_supervisor::SupervisorError;

use crate::directory::DirectoryError;
use crate::proxy::ProxyError;

/// Everything a dispatched request can fail with, mapped onto an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Forbidden")]
    Unauthorized,

    #[error("Bot not found: {0}")]
    NotFound(String),

    #[error("Session directory unavailable: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Bridge could not be started: {0}")]
    Spawn(#[from] SupervisorError),

    #[error("Upstream failure: {0}")]
    Proxy(#[from] ProxyError),
}

impl RouterError {
    pub fn status(&self) -> StatusCode {
        match self {
            RouterError::Unauthorized => StatusCode::FORBIDDEN,
            RouterError::NotFound(_) => StatusCode::NOT_FOUND,
            RouterError::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::Spawn(_) => StatusCode::SERVICE_UNAVAILABLE,
            RouterError::Proxy(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Body text sent to the client. Internal details stay in the logs.
    fn body(&self) -> &'static str {
        match self {
            RouterError::Unauthorized => "Forbidden",
            RouterError::NotFound(_) => "Bot not found",
            RouterError::Directory(_) => "Session directory unavailable",
            RouterError::Spawn(_) => "Terminal bridge unavailable",
            RouterError::Proxy(_) => "Bad Gateway",
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        (self.status(), self.body()).into_response()
    }
}
