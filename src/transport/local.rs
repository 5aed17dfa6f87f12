//! In-process broadcast bus built on a tokio broadcast channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BroadcastTransport, MessageHandler, SyncMessage};
use crate::error::TransportError;

/// Default buffer size for the broadcast channel.
/// Slow endpoints drop the oldest messages beyond this limit.
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    message: SyncMessage,
}

/// A shared channel; each engine attaches through its own [`BusEndpoint`].
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Envelope>,
    next_origin: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_origin: Arc::new(AtomicU64::new(1)),
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a new endpoint that never receives its own messages.
    pub fn endpoint(&self) -> BusEndpoint {
        BusEndpoint {
            origin: self.next_origin.fetch_add(1, Ordering::SeqCst),
            bus: self.clone(),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Total number of messages sent by all endpoints.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance's attachment to a [`LocalBus`].
#[derive(Debug)]
pub struct BusEndpoint {
    origin: u64,
    bus: LocalBus,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl BusEndpoint {
    fn stop_listener(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BroadcastTransport for BusEndpoint {
    async fn send(&self, message: SyncMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.bus.sent.fetch_add(1, Ordering::SeqCst);
        // No receivers is not an error: there may simply be no siblings yet.
        let _ = self.bus.sender.send(Envelope {
            origin: self.origin,
            message,
        });
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        let origin = self.origin;
        let mut receiver = self.bus.sender.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) if envelope.origin == origin => {}
                    Ok(envelope) => handler(envelope.message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(origin, skipped, "bus endpoint lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(origin, "bus closed");
                        break;
                    }
                }
            }
        });

        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = listener.replace(handle) {
            previous.abort();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_listener();
        debug!(origin = self.origin, "bus endpoint closed");
    }
}

impl Drop for BusEndpoint {
    fn drop(&mut self) {
        self.stop_listener();
    }
}
