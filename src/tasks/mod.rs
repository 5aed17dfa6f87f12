//! Background Tasks Module
//!
//! Tasks the engine runs beside its in-memory operations.
//!
//! # Tasks
//! - GC: removes entries long past expiry, started lazily, stops when empty
//! - Persist: applies store writes in commit order
//! - Broadcast: forwards sync messages to the transport in commit order

mod broadcast;
mod gc;
mod persist;

pub(crate) use broadcast::spawn_broadcast_task;
pub(crate) use gc::{spawn_gc_task, Sweep};
pub(crate) use persist::{spawn_persist_task, FailureHook};
pub use persist::StoreOp;
