//! Commands sent to a relay actor from viewer sockets, daemon sockets and
//! HTTP handlers.

use serde_json::Value;
use sessionlink_protocol::{DaemonCommand, ServerMessage, SessionStatus};
use tokio::sync::{mpsc, oneshot};

use super::subscriber::SubscriberTx;
use super::RelayError;

/// A command that can be sent to a relay actor.
pub enum RelayCommand {
    // -- Viewers --
    /// Register a viewer. The actor answers with a `connected` snapshot,
    /// then the replay from `from_index` if one was given, before any live
    /// frame reaches the viewer.
    Attach {
        conn_id: u64,
        from_index: Option<u64>,
        tx: SubscriberTx,
    },

    /// In-band `subscribe` from an attached viewer. Replays whatever below
    /// `from_index` the viewer has not been sent on this connection.
    Subscribe {
        conn_id: u64,
        from_index: Option<u64>,
    },

    Detach { conn_id: u64 },

    // -- Daemon --
    /// Claim the session for a daemon connection. Fails if another daemon
    /// connection already owns it.
    AttachDaemon {
        daemon_client_id: String,
        tx: mpsc::Sender<DaemonCommand>,
        interactive: Option<bool>,
        claude_session_id: Option<String>,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },

    /// The owning daemon connection dropped without reporting an exit.
    DetachDaemon { daemon_client_id: String },

    /// Append daemon output to the log and fan it out, one record per message.
    Append { messages: Vec<Value> },

    /// Fan out a frame that is not part of the log.
    Broadcast { msg: ServerMessage },

    SetStatus { status: SessionStatus },

    SetClaudeSessionId { claude_session_id: String },

    /// The daemon reported process exit. Closes the log.
    Complete {
        exit_code: Option<i32>,
        reason: Option<String>,
        error: Option<String>,
    },

    // -- Viewer → daemon --
    /// Forward a command to the owning daemon. Replies `false` when no daemon
    /// is attached or its channel is gone.
    ToDaemon {
        cmd: DaemonCommand,
        reply: oneshot::Sender<bool>,
    },
}
