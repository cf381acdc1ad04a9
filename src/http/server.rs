//! HTTP server assembly and lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{admission_middleware, AdmissionState};
use crate::error::Result;

/// HTTP server for the reference API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared middleware state
    state: Arc<AdmissionState>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: Arc<AdmissionState>) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server shuts down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state);
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

/// Assemble the application router.
///
/// The admission middleware wraps every route; its skip-list keeps the
/// diagnostic endpoints reachable under abuse.
pub fn router(state: Arc<AdmissionState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/echo", post(echo))
        .layer(from_fn_with_state(state, admission_middleware))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn echo(Json(payload): Json<serde_json::Value>) -> impl IntoResponse {
    Json(payload)
}
