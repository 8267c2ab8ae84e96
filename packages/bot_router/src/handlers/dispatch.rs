use axum::{
    extract::{FromRequestParts, Query, Request, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::AppState;
use crate::error::RouterError;
use crate::proxy::{connect_backend, forward_http, pump_websocket};
use crate::views::index_page;

/// Path prefix the router keeps for its own endpoints
const RESERVED_NAME: &str = "_router";

/// The bot name is the first non-empty path segment, percent-decoded.
pub fn bot_name_from_path(path: &str) -> Option<String> {
    let segment = path.split('/').find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Value of the `token` query parameter. A query that does not parse
/// carries no token.
pub fn token_from_uri(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.token)
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Entry point for everything outside `/_router/`.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    if !is_websocket_upgrade(req.headers()) {
        return dispatch_http(state, req).await;
    }

    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => dispatch_websocket(state, ws, parts.uri, parts.headers).await,
        Err(rejection) => rejection.into_response(),
    }
}

/// Authorize, look up and start (or reuse) the bridge for `bot_name`.
/// Returns the port to forward to.
async fn resolve(
    state: &AppState,
    bot_name: &str,
    token: Option<&str>,
) -> Result<u16, RouterError> {
    let decision = state
        .auth
        .authorize(bot_name, token, &state.registry)
        .await;
    state.metrics.auth(decision);
    if !decision.is_allowed() {
        warn!("Denied request for {}", bot_name);
        return Err(RouterError::Unauthorized);
    }

    if bot_name == RESERVED_NAME {
        state.metrics.not_found();
        return Err(RouterError::NotFound(bot_name.to_string()));
    }

    let record = match state.directory.find(bot_name).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            debug!("No session for {}", bot_name);
            state.metrics.not_found();
            return Err(RouterError::NotFound(bot_name.to_string()));
        }
        Err(e) => {
            error!("Directory lookup for {} failed: {}", bot_name, e);
            state.metrics.directory_error();
            return Err(e.into());
        }
    };

    let ensured = state
        .registry
        .ensure(bot_name, &record.session_id)
        .await
        .map_err(|e| {
            error!("Failed to start bridge for {}: {}", bot_name, e);
            state.metrics.spawn_failure();
            RouterError::from(e)
        })?;
    state.metrics.ensured(ensured);

    if ensured.is_fresh() && !state.readiness.wait(ensured.port()).await {
        state.metrics.readiness_timeout();
    }

    Ok(ensured.port())
}

async fn dispatch_http(state: AppState, req: Request) -> Response {
    state.metrics.http_request();

    let Some(bot_name) = bot_name_from_path(req.uri().path()) else {
        return index_page(&state).await;
    };
    let token = token_from_uri(req.uri());

    let port = match resolve(&state, &bot_name, token.as_deref()).await {
        Ok(port) => port,
        Err(e) => return e.into_response(),
    };

    match forward_http(&state.http_client, req, port).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Proxy error for {} (port {}): {}", bot_name, port, e);
            state.metrics.proxy_error();
            RouterError::from(e).into_response()
        }
    }
}

/// Refuse an upgrade: bare status, no body, connection closed afterwards.
/// The handshake never completes.
fn refuse_upgrade(status: StatusCode) -> Response {
    (status, [(header::CONNECTION, "close")]).into_response()
}

async fn dispatch_websocket(
    state: AppState,
    ws: WebSocketUpgrade,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.metrics.websocket_request();

    let Some(bot_name) = bot_name_from_path(uri.path()) else {
        debug!("Refusing websocket without a bot name");
        return refuse_upgrade(StatusCode::NOT_FOUND);
    };
    let token = token_from_uri(&uri);

    let port = match resolve(&state, &bot_name, token.as_deref()).await {
        Ok(port) => port,
        Err(e) => {
            debug!("Refusing websocket for {}: {}", bot_name, e);
            return refuse_upgrade(e.status());
        }
    };

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let (backend, selected) = match connect_backend(port, path_and_query, &headers).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!("Backend websocket for {} (port {}) failed: {}", bot_name, port, e);
            state.metrics.proxy_error();
            return refuse_upgrade(StatusCode::BAD_GATEWAY);
        }
    };

    let ws = match selected {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    let metrics = state.metrics.clone();
    ws.on_upgrade(move |socket| async move {
        metrics.websocket_opened();
        if let Err(e) = pump_websocket(socket, backend).await {
            debug!("Websocket proxy for {} ended: {}", bot_name, e);
        }
        metrics.websocket_closed();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{TEST_TOKEN, test_app_state, test_app_state_with};
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use tower::ServiceExt;

    async fn get(app: axum::Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    // ── path and query parsing ──────────────────────────────────────────

    #[test]
    fn test_bot_name_from_path() {
        assert_eq!(bot_name_from_path("/"), None);
        assert_eq!(bot_name_from_path(""), None);
        assert_eq!(bot_name_from_path("//"), None);
        assert_eq!(bot_name_from_path("//alice").as_deref(), Some("alice"));
        assert_eq!(bot_name_from_path("//alice/ws").as_deref(), Some("alice"));
        assert_eq!(bot_name_from_path("/alice").as_deref(), Some("alice"));
        assert_eq!(bot_name_from_path("/alice/").as_deref(), Some("alice"));
        assert_eq!(bot_name_from_path("/alice/ws").as_deref(), Some("alice"));
        assert_eq!(bot_name_from_path("/a%20b/x").as_deref(), Some("a b"));
    }

    #[test]
    fn test_token_from_uri() {
        let token = |uri: &str| token_from_uri(&uri.parse::<Uri>().unwrap());
        assert_eq!(token("/alice/"), None);
        assert_eq!(token("/alice/?"), None);
        assert_eq!(token("/alice/?token=abc").as_deref(), Some("abc"));
        assert_eq!(token("/alice/?x=1&token=a%26b&y=2").as_deref(), Some("a&b"));
        assert_eq!(token("/alice/?token=a+b").as_deref(), Some("a b"));
        assert_eq!(token("/alice/?token").as_deref(), Some(""));
        assert_eq!(token("/alice/?tokens=abc"), None);
    }

    #[test]
    fn test_is_websocket_upgrade() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    // ── HTTP dispatch ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_root_lists_directory_names() {
        let (state, store) = test_app_state(17000);
        store.insert_session("win1", "bob").await;
        store.insert_session("win2", "alice").await;
        store.insert_session("win3", "alice").await;
        store.insert("broken", "{").await;

        let resp = get(crate::router(state.clone()), "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let html = body_string(resp).await;

        let expected = format!("/alice/?token={}", TEST_TOKEN);
        assert_eq!(html.matches(&expected).count(), 1);
        assert!(html.contains(&format!("/bob/?token={}", TEST_TOKEN)));
        // Listing never starts bridges
        assert!(state.registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_root_directory_unavailable() {
        let (state, store) = test_app_state(17100);
        store.set_unavailable(true);

        let resp = get(crate::router(state), "/").await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_missing_token_is_forbidden() {
        let (state, store) = test_app_state(17200);
        store.insert_session("win1", "alice").await;

        let resp = get(crate::router(state.clone()), "/alice/").await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = get(crate::router(state.clone()), "/alice/?token=wrong").await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        assert!(state.registry.list().await.is_empty());
        assert_eq!(state.metrics.snapshot().auth.denied, 2);
    }

    #[tokio::test]
    async fn test_unknown_bot_is_not_found_and_never_spawns() {
        let (state, store) = test_app_state(17300);
        store.insert_session("win1", "alice").await;

        let resp = get(
            crate::router(state.clone()),
            &format!("/carol/?token={}", TEST_TOKEN),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(resp).await, "Bot not found");
        assert!(state.registry.supervisor().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_directory_failure_is_internal_error() {
        let (state, store) = test_app_state(17400);
        store.set_unavailable(true);

        let resp = get(crate::router(state), &format!("/alice/?token={}", TEST_TOKEN)).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_service_unavailable() {
        let (state, store) = test_app_state_with(17500, "nonexistent_bridge_binary_12345", &[]);
        store.insert_session("win1", "alice").await;

        let resp = get(
            crate::router(state.clone()),
            &format!("/alice/?token={}", TEST_TOKEN),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(state.registry.get("alice").await.is_none());
        assert_eq!(state.metrics.snapshot().errors.spawn, 1);
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_bad_gateway() {
        // `sleep` never listens, so the readiness wait times out and the
        // forward fails
        let (state, store) = test_app_state(17600);
        store.insert_session("win1", "alice").await;

        let resp = get(
            crate::router(state.clone()),
            &format!("/alice/?token={}", TEST_TOKEN),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_string(resp).await, "Bad Gateway");

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.bridges.spawned, 1);
        assert_eq!(snapshot.bridges.readiness_timeouts, 1);
        assert_eq!(snapshot.errors.proxy, 1);

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_warm_session_needs_no_token() {
        let (state, store) = test_app_state(17700);
        store.insert_session("win1", "alice").await;

        // First access with the token starts the bridge
        let first = get(
            crate::router(state.clone()),
            &format!("/alice/?token={}", TEST_TOKEN),
        )
        .await;
        assert_ne!(first.status(), StatusCode::FORBIDDEN);
        let port = state.registry.live_port("alice").await.unwrap();

        // Later access without it is allowed and reuses the same bridge
        let second = get(crate::router(state.clone()), "/alice/").await;
        assert_ne!(second.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.registry.live_port("alice").await, Some(port));
        assert_eq!(state.registry.supervisor().list().await.len(), 1);

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.auth.warm_session, 1);
        assert_eq!(snapshot.bridges.reused, 1);

        state.registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_reserved_name_is_not_dispatched() {
        let (state, store) = test_app_state(17800);
        store.insert_session("win1", "_router").await;

        let resp = get(
            crate::router(state.clone()),
            &format!("/_router/other?token={}", TEST_TOKEN),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(state.registry.list().await.is_empty());
    }
}
