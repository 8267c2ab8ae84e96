//! Forwarding to bridges on the loopback interface
//!
//! HTTP requests go through a pooled hyper client; WebSocket connections are
//! bridged frame-by-frame between the client socket (axum) and a backend
//! socket (tokio-tungstenite).

use axum::body::Body;
use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};
use axum::http::{HeaderMap, Request, Uri, Version, header};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

pub type HttpClient = Client<HttpConnector, Body>;

pub type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the peer's close reply once one side has closed
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Client headers the backend handshake generates itself, or that only
/// apply to the client hop.
const HANDSHAKE_HEADERS: &[&str] = &[
    "connection",
    "upgrade",
    "host",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "content-length",
];

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream websocket failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("client websocket failed: {0}")]
    Client(#[from] axum::Error),
}

pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

fn target_uri(scheme: &str, port: u16, path_and_query: &str) -> Result<Uri, ProxyError> {
    let path_and_query = if path_and_query.starts_with('/') {
        path_and_query.to_string()
    } else {
        format!("/{}", path_and_query)
    };
    let target = format!("{}://127.0.0.1:{}{}", scheme, port, path_and_query);
    target
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", target, e)))
}

/// Forward `req` to the bridge on `port`, keeping method, path, query,
/// headers and body.
pub async fn forward_http(
    client: &HttpClient,
    req: Request<Body>,
    port: u16,
) -> Result<Response, ProxyError> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = target_uri("http", port, path_and_query)?;

    debug!("Proxying {} {} to {}", req.method(), req.uri(), uri);

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    let response = client.request(Request::from_parts(parts, body)).await?;
    Ok(response.map(Body::new))
}

/// Open a WebSocket to the bridge on `port` carrying the client's headers
/// (cookies, credentials, origin, offered subprotocols). Returns the socket
/// and the subprotocol the bridge picked.
pub async fn connect_backend(
    port: u16,
    path_and_query: &str,
    client_headers: &HeaderMap,
) -> Result<(BackendSocket, Option<String>), ProxyError> {
    let uri = target_uri("ws", port, path_and_query)?;
    let mut request = uri.into_client_request()?;
    let headers = request.headers_mut();
    for (name, value) in client_headers {
        if !HANDSHAKE_HEADERS.contains(&name.as_str()) {
            headers.append(name, value.clone());
        }
    }

    debug!("Connecting to backend websocket {}", request.uri());

    let (socket, response) = connect_async(request).await?;
    let selected = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Ok((socket, selected))
}

/// Shuttle frames both ways until either side closes or fails.
///
/// A close from one side is relayed to the other, then the opposite
/// direction keeps running (up to [`CLOSE_GRACE`]) so the reply completes
/// the closing handshake on both sockets.
pub async fn pump_websocket(client: WebSocket, backend: BackendSocket) -> Result<(), ProxyError> {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    // Each direction yields whether it relayed a close
    let client_to_backend = async {
        while let Some(msg) = client_rx.next().await {
            let msg = to_backend(msg?);
            if matches!(msg, TungsteniteMessage::Close(_)) {
                // Fails once the backend closed first; flushing below
                // still sends its queued reply
                if let Err(e) = backend_tx.send(msg).await {
                    debug!("Close not relayed to backend: {}", e);
                }
                backend_tx.close().await?;
                return Ok(true);
            }
            backend_tx.send(msg).await?;
        }
        Ok::<bool, ProxyError>(false)
    };

    let backend_to_client = async {
        while let Some(msg) = backend_rx.next().await {
            let Some(msg) = to_client(msg?) else {
                continue;
            };
            if matches!(msg, AxumMessage::Close(_)) {
                if let Err(e) = client_tx.send(msg).await {
                    debug!("Close not relayed to client: {}", e);
                }
                client_tx.close().await?;
                return Ok(true);
            }
            client_tx.send(msg).await?;
        }
        Ok::<bool, ProxyError>(false)
    };

    tokio::pin!(client_to_backend, backend_to_client);

    tokio::select! {
        result = &mut client_to_backend => {
            if result? {
                finish_close(backend_to_client).await
            } else {
                Ok(())
            }
        }
        result = &mut backend_to_client => {
            if result? {
                finish_close(client_to_backend).await
            } else {
                Ok(())
            }
        }
    }
}

async fn finish_close<F>(rest: F) -> Result<(), ProxyError>
where
    F: Future<Output = Result<bool, ProxyError>>,
{
    match tokio::time::timeout(CLOSE_GRACE, rest).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => {
            debug!("No close reply within {:?}", CLOSE_GRACE);
            Ok(())
        }
    }
}

fn to_backend(msg: AxumMessage) -> TungsteniteMessage {
    match msg {
        AxumMessage::Text(text) => TungsteniteMessage::Text(text.to_string().into()),
        AxumMessage::Binary(data) => TungsteniteMessage::Binary(data),
        AxumMessage::Ping(data) => TungsteniteMessage::Ping(data),
        AxumMessage::Pong(data) => TungsteniteMessage::Pong(data),
        AxumMessage::Close(frame) => TungsteniteMessage::Close(frame.map(|f| {
            TungsteniteCloseFrame {
                code: f.code.into(),
                reason: f.reason.to_string().into(),
            }
        })),
    }
}

fn to_client(msg: TungsteniteMessage) -> Option<AxumMessage> {
    let msg = match msg {
        TungsteniteMessage::Text(text) => AxumMessage::Text(text.to_string().into()),
        TungsteniteMessage::Binary(data) => AxumMessage::Binary(data),
        TungsteniteMessage::Ping(data) => AxumMessage::Ping(data),
        TungsteniteMessage::Pong(data) => AxumMessage::Pong(data),
        TungsteniteMessage::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
        TungsteniteMessage::Frame(_) => return None,
    };
    Some(msg)
}
