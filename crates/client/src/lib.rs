//! SessionLink stream client
//!
//! One logical subscription per session, carried over as many WebSocket
//! connections as it takes. Indices are applied gap-free and in order; the
//! stream resumes from the last applied index after every reconnect.

pub mod core;
pub mod error;
pub mod stream;

pub use crate::core::{
    reconnect_delay, Action, ConnectionPhase, StreamCore, StreamEvent, BASE_RECONNECT_DELAY,
    MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY, PING_INTERVAL,
};
pub use error::StreamError;
pub use stream::{connect, SessionStreamHandle, StreamConfig};
