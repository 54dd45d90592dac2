//! HTTP server that hands every inbound request to the retry controller.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::InboundRequest;
use crate::retry::{Outcome, RetryController};

/// Default upper bound for buffered request bodies (32 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }
}

/// Shared state for the proxy server.
#[derive(Debug)]
struct ServerState {
    controller: RetryController,
    max_body_bytes: usize,
}

/// The session proxy server.
pub struct ProxyServer {
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl ProxyServer {
    pub fn new(config: ServerConfig, controller: RetryController) -> Self {
        Self {
            state: Arc::new(ServerState {
                controller,
                max_body_bytes: config.max_body_bytes,
            }),
            config,
        }
    }

    /// Build the axum router. Every method and path is proxied.
    pub fn router(&self) -> Router {
        // Custom span: the default one records the URI, which may carry the access key.
        let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                request_id = %uuid::Uuid::new_v4(),
                method = %request.method(),
            )
        });

        Router::new()
            .fallback(handle_any)
            .with_state(self.state.clone())
            .layer(trace)
    }

    /// Run the proxy server.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Starting session proxy server");
        axum::serve(listener, self.router()).await
    }

    /// Run with graceful shutdown, returning the bound address.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Starting session proxy server");
        tokio::spawn(async move {
            axum::serve(listener, self.router())
                .with_graceful_shutdown(shutdown)
                .await
                .ok();
        });
        Ok(local_addr)
    }
}

/// Handle any method on any path.
async fn handle_any(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read request body");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("could not read request body: {}", e),
            )
                .into_response();
        }
    };

    let inbound = InboundRequest::new(parts.method, parts.uri.path(), parts.uri.query())
        .with_headers(parts.headers)
        .with_body(body);

    tracing::info!(
        method = %inbound.method,
        path = %state.controller.engine().gate().redact(&inbound.path),
        "Proxying request"
    );

    state.controller.handle(&inbound).await.into_response()
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::Forwarded(proxied) => {
                let mut response = Response::new(Body::from(proxied.body));
                *response.status_mut() = proxied.status;
                *response.headers_mut() = proxied.headers;
                response
            }
            Outcome::Rejected => (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
            Outcome::Failed { status, message } => (status, message).into_response(),
        }
    }
}
