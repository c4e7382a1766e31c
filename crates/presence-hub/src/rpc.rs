use crate::daemon::DaemonHandle;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use presence_core::ipc_frame::FrameError;
use presence_core::rpc::RpcRequest;
use serde_json::json;
use std::{io, net::SocketAddr};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("port {port} is already in use")]
    EndpointInUse { port: u16 },
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("rpc server failed: {0}")]
    Serve(io::Error),
    #[error("handshake document could not be encoded: {0}")]
    Handshake(#[from] FrameError),
}

pub async fn bind(port: u16) -> Result<TcpListener, HubError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr).await.map_err(|source| match source.kind() {
        io::ErrorKind::AddrInUse => HubError::EndpointInUse { port },
        _ => HubError::Bind { port, source },
    })
}

pub fn router(daemon: DaemonHandle) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .with_state(daemon)
}

fn bad_request(message: impl Into<String>) -> Response {
    let message = message.into();
    debug!(event = "rpc_bad_request", error = %message);
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn rpc_handler(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(daemon): State<DaemonHandle>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if !is_json {
        return bad_request("only application/json POST requests are accepted");
    }

    let call = match RpcRequest::parse(&body).and_then(RpcRequest::into_call) {
        Ok(call) => call,
        Err(err) => return bad_request(err.to_string()),
    };
    match daemon.call(call).await {
        Ok(reply) => Json(reply).into_response(),
        Err(err) => {
            warn!(event = "rpc_daemon_gone", error = %err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
