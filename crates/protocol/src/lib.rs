//! SessionLink Protocol
//!
//! Shared types for communication between the SessionLink server, viewers,
//! daemons and hooks. These types are serialized as JSON over WebSocket and
//! HTTP.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod daemon;
pub mod hook;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use daemon::{DaemonCommand, DaemonMessage};
pub use server::ServerMessage;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall clock as unix milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
