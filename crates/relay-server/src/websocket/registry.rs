//! Authoritative set of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::connection::{Connection, ConnectionId, TransportState};

/// Registry of all connected clients.
///
/// Membership changes take the write lock; `snapshot` holds the read
/// lock only long enough to clone the entries, so no send ever happens
/// under the lock and a slow recipient cannot stall registration.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a newly accepted connection.
    ///
    /// The connection is visible to every subsequent `snapshot`.
    pub async fn register(&self, connection: Arc<Connection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by ID and mark it `Closed`.
    ///
    /// Idempotent: removing an unknown or already-removed ID is a no-op.
    pub async fn unregister(&self, id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        if let Some(conn) = conns.remove(id) {
            conn.set_state(TransportState::Closed);
            debug!(conn_id = %id, remaining = conns.len(), "connection unregistered");
        }
    }

    /// A consistent point-in-time view of the registered connections.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let conns = self.connections.read().await;
        conns.values().cloned().collect()
    }

    /// Number of registered connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Teardown: mark every connection `Closing`, drop it from the
    /// registry, and return how many were closed.
    ///
    /// Dropping the entries releases the outbound senders, so writer
    /// tasks observing a closed channel wind down on their own.
    pub async fn close_all(&self) -> usize {
        let mut conns = self.connections.write().await;
        let closed = conns.len();
        for conn in conns.values() {
            conn.set_state(TransportState::Closing);
        }
        conns.clear();
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
