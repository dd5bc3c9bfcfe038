//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{get_delay, get_rule, health, list_rules, log_event, AppState};
use crate::error::{Result, ThrottleError};
use crate::throttle::Throttler;

/// HTTP server exposing a throttler.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared handler state
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new server around a configured throttler.
    pub fn new(addr: SocketAddr, throttler: Throttler) -> Self {
        Self {
            addr,
            state: Arc::new(AppState::new(throttler)),
        }
    }

    /// The routes served, with state attached.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/rules", get(list_rules))
            .route("/rules/:name", get(get_rule))
            .route("/throttles/:name/delay", post(get_delay))
            .route("/throttles/:name/events", post(log_event))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP server for throttle service");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            ThrottleError::Io(e)
        })
    }
}
