//! Request and Response models for the cache HTTP binding
//!
//! DTOs used for serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

pub use requests::{GetQuery, SetRequest};
pub use responses::{
    ClearResponse, DeleteResponse, ErrorResponse, GetResponse, HealthResponse, KeysResponse,
    RefreshResponse, SetResponse, SnapshotResponse, StatsResponse,
};
