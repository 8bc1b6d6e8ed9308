//! HTTP server with graceful shutdown.
//!
//! On SIGINT/SIGTERM the listener stops accepting, in-flight requests get up to
//! [`GRACEFUL_TIMEOUT`] to finish (a second signal forces exit), and then the gateway's
//! connection pool is closed.

use crate::db::{Connector, Gateway};
use crate::error::{DbError, DbResult};
use crate::http::{AppState, router};
use axum::http::HeaderValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

pub const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// CORS layer for the configured origins. Any origin when none are configured.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, String> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o.trim()).map_err(|_| format!("Invalid CORS origin '{}'", o))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

pub struct HttpServer<C: Connector> {
    state: AppState<C>,
    cors: CorsLayer,
    bind_addr: String,
}

impl<C: Connector> HttpServer<C> {
    pub fn new(state: AppState<C>, cors: CorsLayer, bind_addr: impl Into<String>) -> Self {
        Self {
            state,
            cors,
            bind_addr: bind_addr.into(),
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Serve until a shutdown signal, then close the gateway.
    pub async fn run(self) -> DbResult<()> {
        let gateway: Arc<Gateway<C>> = Arc::clone(&self.state.gateway);
        let app = router(self.state, self.cors);

        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            DbError::internal(format!("Failed to bind to {}: {}", self.bind_addr, e))
        })?;

        info!(address = %self.bind_addr, "HTTP server listening");

        // Coordinates the forced-exit timer with the graceful shutdown signal
        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        gateway.close().await;
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for in-flight requests (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        gateway.close().await;
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
