//! # relay-server
//!
//! Axum HTTP + `WebSocket` message relay.
//!
//! - `WebSocket` gateway: every frame a client sends is rebroadcast
//!   verbatim to all connected clients (the sender included, unless
//!   configured otherwise)
//! - HTTP endpoints: health check, Prometheus metrics, static assets
//! - Graceful shutdown via `CancellationToken` (close all transports,
//!   clear the registry)

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
