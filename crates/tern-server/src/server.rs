use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tern_engine::Orchestrator;

use crate::config::ServerConfig;
use crate::handlers;

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub start_time: Instant,
    pub heartbeat_interval: Duration,
    /// Cancelled when the server shuts down; ends open event streams.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", post(handlers::create_session).get(handlers::list_sessions))
        .route("/sessions/{id}", get(handlers::get_session).delete(handlers::delete_session))
        .route("/sessions/{id}/messages", get(handlers::list_messages))
        .route("/sessions/{id}/turns", post(handlers::submit_turn))
        .route("/sessions/{id}/cancel", post(handlers::cancel_turn))
        .route("/sessions/{id}/events", get(handlers::session_events))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut the server down.
pub async fn start(config: ServerConfig, orchestrator: Arc<Orchestrator>) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let state = AppState {
        orchestrator,
        start_time: Instant::now(),
        heartbeat_interval: config.heartbeat_interval(),
        shutdown: shutdown.clone(),
    };
    let router = build_router(state, config.request_timeout());

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "tern server listening");

    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(signal.cancelled_owned())
            .await;
        if let Err(e) = result {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown,
        shutdown_timeout: config.shutdown_timeout(),
        server,
    })
}

/// Handle returned by [`start`]. Dropping it leaves the server running.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Base URL, e.g. `http://127.0.0.1:9091`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting connections, end event streams, and wait for the
    /// server task up to the configured timeout.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        info!(timeout_secs = self.shutdown_timeout.as_secs(), "shutting down server");
        let mut server = self.server;
        if tokio::time::timeout(self.shutdown_timeout, &mut server).await.is_err() {
            warn!("shutdown timed out, aborting server task");
            server.abort();
        }
    }
}
