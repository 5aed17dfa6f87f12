//! API Handlers
//!
//! HTTP request handlers for each cache endpoint. Every handler is a thin
//! shim over one [`CacheEngine`] operation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::engine::{CacheEngine, EntryInfo, GetOptions};
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, ErrorResponse, GetQuery, GetResponse, HealthResponse,
    KeysResponse, RefreshResponse, SetRequest, SetResponse, SnapshotResponse, StatsResponse,
};

/// Application state shared across all handlers.
///
/// The engine handle is cheap to clone and synchronizes internally.
#[derive(Clone, Debug)]
pub struct AppState {
    pub engine: CacheEngine,
}

impl AppState {
    pub fn new(engine: CacheEngine) -> Self {
        Self { engine }
    }
}

fn not_found(key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(format!("Key '{}' not found", key))),
    )
        .into_response()
}

/// Handler for PUT /keys/:key
pub async fn set_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidArgument(error_msg));
    }

    let ttl = req.ttl();
    state.engine.set(&key, req.value, ttl, None)?;

    Ok(Json(SetResponse::new(key)))
}

/// Handler for GET /keys/:key
///
/// `?extend=true` resets the entry's expiry; `?stale=true` serves an expired
/// value while its refresher runs.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Response> {
    let options = GetOptions::from(query);
    match state.engine.get(&key, options)? {
        Some(value) => Ok(Json(GetResponse::new(key, value)).into_response()),
        None => Ok(not_found(&key)),
    }
}

/// Handler for GET /keys/:key/info
pub async fn info_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response> {
    let info: Option<EntryInfo> = state.engine.entry_info(&key)?;
    Ok(match info {
        Some(info) => Json(info).into_response(),
        None => not_found(&key),
    })
}

/// Handler for DELETE /keys/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let existed = state.engine.remove(&key)?;
    Ok(Json(DeleteResponse::new(key, existed)))
}

/// Handler for GET /keys
pub async fn keys_handler(State(state): State<AppState>) -> Result<Json<KeysResponse>> {
    Ok(Json(KeysResponse::new(state.engine.keys()?)))
}

/// Handler for DELETE /keys
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    let removed = state.engine.size()?;
    state.engine.clear()?;
    Ok(Json(ClearResponse::new(removed)))
}

/// Handler for GET /snapshot
pub async fn snapshot_handler(State(state): State<AppState>) -> Result<Json<SnapshotResponse>> {
    Ok(Json(SnapshotResponse::new(state.engine.snapshot()?)))
}

/// Handler for POST /keys/:key/refresh
pub async fn refresh_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<RefreshResponse>> {
    let outcome = state.engine.refresh(&key).await?;
    Ok(Json(RefreshResponse::new(key, outcome)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    Ok(Json(StatsResponse::from(state.engine.stats()?)))
}

/// Handler for GET /health
///
/// Always answers, including after the engine was destroyed.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.engine.namespace(),
        state.engine.is_destroyed(),
    ))
}
