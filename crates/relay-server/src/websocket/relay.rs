//! Message fan-out to connected clients.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::{WS_MESSAGES_RELAYED_TOTAL, WS_SEND_DROPS_TOTAL};

use super::connection::{ConnectionId, RelayMessage};
use super::registry::ConnectionRegistry;

/// Rebroadcasts every inbound message to all registered connections.
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
    exclude_sender: bool,
}

impl BroadcastRelay {
    /// Create a relay over the given registry.
    pub fn new(registry: Arc<ConnectionRegistry>, exclude_sender: bool) -> Self {
        Self {
            registry,
            exclude_sender,
        }
    }

    /// The registry this relay fans out over.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Whether the originating connection is skipped during fan-out.
    pub fn excludes_sender(&self) -> bool {
        self.exclude_sender
    }

    /// Relay a message from `source` to every connection open at
    /// snapshot time.
    ///
    /// Delivery is best-effort and fire-and-forget per recipient: a
    /// recipient that is no longer open, or whose outbound queue is
    /// full or closed, is skipped and never aborts delivery to the
    /// rest. The payload is forwarded unchanged.
    pub async fn relay(&self, source: &ConnectionId, message: RelayMessage) {
        let message = Arc::new(message);
        let recipients = self.registry.snapshot().await;
        counter!(WS_MESSAGES_RELAYED_TOTAL).increment(1);
        debug!(
            source = %source,
            recipients = recipients.len(),
            len = message.len(),
            "relaying message"
        );
        for conn in recipients {
            if self.exclude_sender && conn.id == *source {
                continue;
            }
            if !conn.is_open() {
                debug!(conn_id = %conn.id, state = ?conn.state(), "skipping non-open recipient");
                continue;
            }
            if !conn.send(Arc::clone(&message)) {
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, "failed to enqueue message (queue full or closed)");
            }
        }
    }
}
