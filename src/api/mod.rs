//! HTTP surface for the Control API.
//!
//! JSON in, JSON out. Errors come back as `{ "error", "code" }`.

pub mod auth;
pub mod error;
pub mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::Orchestrator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// When set, every route except `/health` needs this bearer token.
    pub api_token: Option<Arc<SecretString>>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, api_token: Option<SecretString>) -> Self {
        Self {
            orchestrator,
            api_token: api_token.map(Arc::new),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/events", post(handlers::submit_event))
        .route(
            "/queue",
            get(handlers::queue_depth).delete(handlers::clear_queue),
        )
        .route("/jobs", get(handlers::list_jobs).post(handlers::start_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/stop", post(handlers::stop_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "control API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
