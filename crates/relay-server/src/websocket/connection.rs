//! Per-client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique connection identifier, assigned at accept time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl Default for ConnectionId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ConnectionId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport state as seen by the relay.
///
/// Transitions are forward-only: `Open` → `Closing` → `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TransportState {
    /// Handshake complete, frames flowing.
    Open = 0,
    /// Close initiated, no new messages accepted.
    Closing = 1,
    /// Transport gone; the connection must leave the registry.
    Closed = 2,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// An opaque payload relayed verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayMessage {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

impl RelayMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One connected client.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<RelayMessage>>,
    /// Current transport state (forward-only transitions).
    state: AtomicU8,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last Pong was received (unix seconds).
    last_pong: AtomicU64,
    /// Count of messages dropped due to a full or closed queue.
    dropped_sends: AtomicU64,
}

impl Connection {
    /// Create a new connection in the `Open` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<RelayMessage>>) -> Self {
        Self {
            id,
            tx,
            state: AtomicU8::new(TransportState::Open as u8),
            connected_at: Instant::now(),
            last_pong: AtomicU64::new(now_secs()),
            dropped_sends: AtomicU64::new(0),
        }
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Advance the transport state. Backward transitions are ignored,
    /// so `Closed` is sticky.
    pub fn set_state(&self, state: TransportState) {
        let _ = self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    /// Enqueue a message for the write task.
    ///
    /// Returns `false` if the queue is full or closed, and increments
    /// the dropped counter. Never blocks.
    pub fn send(&self, message: Arc<RelayMessage>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_sends.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_sends.load(Ordering::Relaxed)
    }

    /// Record a Pong (or Ping) from the client.
    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    /// Whether the client has responded within `timeout`.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
