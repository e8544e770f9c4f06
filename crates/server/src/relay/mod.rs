//! Session relay
//!
//! Bridges one daemon connection (the only writer) to any number of viewer
//! subscribers per session. Each session runs as an actor so appends, replays
//! and subscriber changes are applied in a single order.

pub mod actor;
pub mod command;
pub mod log;
pub mod subscriber;

use thiserror::Error;

pub use actor::{RelayHandle, RelaySession, RelaySnapshot};
pub use command::RelayCommand;
pub use log::{MessageLog, MessageRecord, BASE_INDEX};
pub use subscriber::{subscriber_channel, SubscriberRx, SubscriberTx};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("session {session_id} is owned by daemon {owner}")]
    SessionOwned { session_id: String, owner: String },

    #[error("session {0} has already completed")]
    SessionCompleted(String),

    #[error("relay actor for session {0} is gone")]
    ActorGone(String),
}
