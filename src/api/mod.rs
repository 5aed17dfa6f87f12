//! API Module
//!
//! HTTP binding of the cache engine.
//!
//! # Endpoints
//! - `PUT /keys/:key` - Store a JSON value
//! - `GET /keys/:key` - Read a value (`?extend=`, `?stale=`)
//! - `GET /keys/:key/info` - Inspect an entry
//! - `DELETE /keys/:key` - Remove a key
//! - `POST /keys/:key/refresh` - Force a refresh
//! - `GET /keys`, `DELETE /keys` - List or clear
//! - `GET /snapshot` - Full key/value map
//! - `GET /stats` - Cache statistics
//! - `GET /health` - Health check

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
