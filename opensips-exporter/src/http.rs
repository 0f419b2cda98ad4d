//! HTTP server for the Prometheus scrape endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use opensips_mi::CommandExecutor;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::SharedCollector;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
struct AppState<E> {
    collector: SharedCollector<E>,
}

impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            collector: self.collector.clone(),
        }
    }
}

/// Create the HTTP router.
pub fn create_router<E>(collector: SharedCollector<E>, metrics_path: &str) -> Router
where
    E: CommandExecutor + 'static,
{
    let state = AppState { collector };

    Router::new()
        .route(metrics_path, get(metrics_handler::<E>))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<E>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs one collection pass per scrape.
async fn metrics_handler<E>(State(state): State<AppState<E>>) -> Response
where
    E: CommandExecutor + 'static,
{
    let body = state.collector.collect().await.render();

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Ready once a pass has seen OpenSIPS up.
async fn ready_handler<E>(State(state): State<AppState<E>>) -> Response
where
    E: CommandExecutor + 'static,
{
    if state.collector.stats().last_up {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - OpenSIPS not reached yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer<E> {
    collector: SharedCollector<E>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl<E> HttpServer<E>
where
    E: CommandExecutor + 'static,
{
    /// Create a new HTTP server.
    pub fn new(collector: SharedCollector<E>, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr().unwrap_or(self.listen_addr);
        let router = create_router(self.collector, &self.metrics_path);

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
