//! HTTP server setup and routing
//!
//! Sets up the Axum router for control endpoints and SSE, and serves it until
//! the shutdown future resolves.

use super::{handlers, sse};
use crate::catalog::CatalogSource;
use crate::db::RotationState;
use crate::error::{Error, Result};
use crate::playback::CoordinatorHandle;
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub coordinator: CoordinatorHandle,
    pub rotation: Arc<RotationState>,
    pub catalog: Arc<dyn CatalogSource>,
    pub root_folder: PathBuf,
}

/// All routes with the context attached
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Streaming control
        .route("/streaming/start", post(handlers::start_streaming))
        .route("/streaming/stop", post(handlers::stop_streaming))
        .route("/streaming/status", get(handlers::streaming_status))
        .route("/streaming/swap", post(handlers::swap_videos))
        // Cache
        .route("/storage", get(handlers::storage))
        .route("/cache/cleanup", post(handlers::cleanup_cache))
        // Rotation state
        .route("/history", get(handlers::history))
        .route(
            "/queue",
            get(handlers::get_queue)
                .post(handlers::enqueue)
                .delete(handlers::clear_queue),
        )
        .route("/settings", get(handlers::settings))
        // Catalog browsing
        .route("/catalog", get(handlers::list_catalog))
        // SSE event stream
        .route("/events", get(sse::event_stream))
        // Build information
        .route("/build_info", get(handlers::get_build_info))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}

/// Serve the API on `port` until `shutdown` resolves
pub async fn run<F>(ctx: AppContext, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
