//! WebSocket connection management and broadcast fan-out.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-client state: id, transport state, outbound queue |
//! | `registry` | Authoritative set of live connections, snapshot iteration |
//! | `relay` | Fan-out: one inbound message to every open connection |
//! | `session` | Per-connection read/write loops, heartbeat, cleanup |
//!
//! ## Data Flow
//!
//! `session` (reader) → `relay` → `registry.snapshot()` → per-connection
//! outbound queues → `session` (writer) of each recipient.

pub mod connection;
pub mod registry;
pub mod relay;
pub mod session;
