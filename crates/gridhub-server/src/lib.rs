//! # gridhub-server
//!
//! Axum HTTP + `WebSocket` gateway in front of the Gridhub engine.
//!
//! - `/ws`: viewer connections — subscribe/unsubscribe/command in, live
//!   data-updates out, server-initiated ping with pong deadline
//! - `/health`: liveness plus connection and instance counters
//! - access gate: unknown paths redirect to `/login`
//! - graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod access;
pub mod config;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, GridhubServer};
pub use shutdown::ShutdownCoordinator;
