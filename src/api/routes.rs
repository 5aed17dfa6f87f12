//! API Routes
//!
//! Configures the Axum router with all cache endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, delete_handler, get_handler, health_handler, info_handler, keys_handler,
    refresh_handler, set_handler, snapshot_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET|PUT|DELETE /keys/:key` - Read, store or remove one entry
/// - `GET /keys/:key/info` - Expiry, ttl and refresher binding of one entry
/// - `POST /keys/:key/refresh` - Run the entry's refresher now
/// - `GET|DELETE /keys` - List or clear all keys
/// - `GET /snapshot` - Full key/value map
/// - `GET /stats` - Cache statistics
/// - `GET /health` - Health check
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/keys", get(keys_handler).delete(clear_handler))
        .route(
            "/keys/:key",
            get(get_handler).put(set_handler).delete(delete_handler),
        )
        .route("/keys/:key/info", get(info_handler))
        .route("/keys/:key/refresh", post(refresh_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
