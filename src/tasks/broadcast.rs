//! Outbound Broadcast Task
//!
//! Forwards sync messages to the transport in commit order, then closes the
//! transport once the engine drops its end of the queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{BroadcastTransport, SyncMessage};

pub(crate) fn spawn_broadcast_task(
    transport: Arc<dyn BroadcastTransport>,
    mut queue: mpsc::UnboundedReceiver<SyncMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let key = message.key.clone();
            if let Err(err) = transport.send(message).await {
                warn!(key = %key, error = %err, "broadcast failed");
            }
        }
        transport.close();
        debug!("broadcast queue closed");
    })
}
