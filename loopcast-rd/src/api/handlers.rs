//! HTTP request handlers
//!
//! Coordinator operations go through the [`CoordinatorHandle`](crate::playback::CoordinatorHandle);
//! failures map to `(StatusCode, Json<StatusResponse>)` with the error kind.

use crate::api::server::AppContext;
use crate::cache::{CleanupReport, StorageInfo};
use crate::catalog::{CatalogFilter, MediaItem};
use crate::db::StateValue;
use crate::error::Error;
use crate::playback::CoordinatorStatus;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use loopcast_common::db::{PlaylistQueueRow, RecentlyPlayedRow};
use loopcast_common::events::StreamingState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    root_folder: String,
    streaming_state: StreamingState,
    coordinator_restarts: u32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
    kind: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    item_id: String,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    status: String,
    queue_id: i64,
    item: MediaItem,
}

#[derive(Debug, Serialize)]
pub struct ClearQueueResponse {
    removed: u64,
}

/// Build information response
#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub build_profile: String,
}

type ApiError = (StatusCode, Json<StatusResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn error_response(e: Error) -> ApiError {
    let status = match &e {
        Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::NoItemsAvailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(kind = e.kind(), "Request failed: {}", e);
    } else {
        warn!(kind = e.kind(), "Request rejected: {}", e);
    }

    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", e),
            kind: e.kind().to_string(),
        }),
    )
}

// ============================================================================
// Health
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "rotation_daemon".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        root_folder: ctx.root_folder.display().to_string(),
        streaming_state: ctx.state.streaming_state().await,
        coordinator_restarts: ctx.state.restarts(),
    })
}

// ============================================================================
// Streaming Control
// ============================================================================

/// POST /streaming/start
pub async fn start_streaming(State(ctx): State<AppContext>) -> ApiResult<CoordinatorStatus> {
    info!("Start streaming request");
    ctx.coordinator.start().await.map(Json).map_err(error_response)
}

/// POST /streaming/stop
pub async fn stop_streaming(State(ctx): State<AppContext>) -> ApiResult<CoordinatorStatus> {
    info!("Stop streaming request");
    ctx.coordinator.stop().await.map(Json).map_err(error_response)
}

/// GET /streaming/status
pub async fn streaming_status(State(ctx): State<AppContext>) -> ApiResult<CoordinatorStatus> {
    ctx.coordinator.status().await.map(Json).map_err(error_response)
}

/// POST /streaming/swap - swap immediately regardless of progress
pub async fn swap_videos(State(ctx): State<AppContext>) -> ApiResult<CoordinatorStatus> {
    info!("Manual swap request");
    ctx.coordinator.swap().await.map(Json).map_err(error_response)
}

// ============================================================================
// Cache
// ============================================================================

/// GET /storage - resident files and budget
pub async fn storage(State(ctx): State<AppContext>) -> ApiResult<StorageInfo> {
    ctx.coordinator.storage().await.map(Json).map_err(error_response)
}

/// POST /cache/cleanup
pub async fn cleanup_cache(State(ctx): State<AppContext>) -> ApiResult<CleanupReport> {
    info!("Cache cleanup request");
    ctx.coordinator.cleanup().await.map(Json).map_err(error_response)
}

// ============================================================================
// Rotation State
// ============================================================================

/// GET /history?limit=N - most recent first
pub async fn history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<RecentlyPlayedRow>> {
    let limit = query
        .limit
        .unwrap_or(crate::db::history::MAX_RECENTLY_PLAYED);
    ctx.rotation
        .recently_played(limit)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /queue
pub async fn get_queue(State(ctx): State<AppContext>) -> ApiResult<Vec<PlaylistQueueRow>> {
    ctx.rotation.list_queue().await.map(Json).map_err(error_response)
}

/// POST /queue - play a specific catalog item next
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<EnqueueResponse> {
    let item_id = req.item_id.trim();
    if item_id.is_empty() {
        return Err(error_response(Error::BadRequest("item_id is empty".into())));
    }

    let item = ctx
        .catalog
        .get(item_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::NotFound(format!("catalog item {}", item_id))))?;

    let queue_id = ctx.rotation.enqueue(&item).await.map_err(error_response)?;
    info!(item_id = %item.id, queue_id, "Item enqueued");

    Ok(Json(EnqueueResponse {
        status: "queued".to_string(),
        queue_id,
        item,
    }))
}

/// DELETE /queue
pub async fn clear_queue(State(ctx): State<AppContext>) -> ApiResult<ClearQueueResponse> {
    let removed = ctx.rotation.clear_queue().await.map_err(error_response)?;
    info!(removed, "Queue cleared");
    Ok(Json(ClearQueueResponse { removed }))
}

/// GET /settings - every stored setting
pub async fn settings(State(ctx): State<AppContext>) -> ApiResult<BTreeMap<String, StateValue>> {
    ctx.rotation
        .all_settings()
        .await
        .map(|all| Json(all.into_iter().collect()))
        .map_err(error_response)
}

// ============================================================================
// Catalog
// ============================================================================

/// GET /catalog?mediatype=&search=&year=&limit=&offset=
pub async fn list_catalog(
    State(ctx): State<AppContext>,
    Query(filter): Query<CatalogFilter>,
) -> ApiResult<Vec<MediaItem>> {
    ctx.catalog.list(&filter).await.map(Json).map_err(error_response)
}

// ============================================================================
// Build Information
// ============================================================================

/// GET /build_info
pub async fn get_build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}
