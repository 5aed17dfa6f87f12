//! Reactive Cache - an in-memory cache engine with background refresh
//!
//! Entries carry a TTL and an optional refresher that re-fetches the value
//! shortly before expiry. Writes are persisted to a pluggable store, bounded
//! by LRU eviction, observable through subscriptions and replicated to
//! sibling instances over a broadcast transport.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod persist;
pub mod tasks;
pub mod transport;

pub use api::{create_router, AppState};
pub use cache::{CacheStats, Refresher};
pub use config::CacheConfig;
pub use engine::{
    CacheEngine, DiagnosticHook, EntryInfo, GetOptions, MutateOutcome, RefreshOutcome,
    Subscription,
};
pub use error::{CacheError, Result, StoreError, TransportError};
pub use persist::{JsonFileStore, MemoryStore, PersistentStore, StoredRecord};
pub use transport::{BroadcastTransport, BusEndpoint, LocalBus, SyncEntry, SyncMessage};
