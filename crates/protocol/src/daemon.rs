//! Daemon ↔ Server messages
//!
//! A daemon hosts any number of agent processes and multiplexes them over a
//! single socket. Every frame names the session it belongs to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ClaudeState, SessionStatus};

/// Messages sent from a daemon to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    // Lifecycle
    SessionStarted {
        session_id: String,
        cwd: String,
        harness: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claude_session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interactive: Option<bool>,
    },
    SessionStatus {
        session_id: String,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claude_session_id: Option<String>,
    },
    SessionEnded {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // Logged output
    Messages {
        session_id: String,
        messages: Vec<Value>,
    },

    // Live-only output
    ToolResult {
        session_id: String,
        tool_use_id: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Diff {
        session_id: String,
        files: Vec<Value>,
    },
    QuestionPrompt {
        session_id: String,
        tool_use_id: String,
        question: Value,
    },
    PermissionPrompt {
        session_id: String,
        request_id: String,
        tool_name: String,
        input: Value,
    },
    ControlRequest {
        session_id: String,
        request_id: String,
        request: Value,
    },
    State {
        session_id: String,
        state: ClaudeState,
    },
    Output {
        session_id: String,
        data: String,
    },

    Ping,

    #[serde(other)]
    Unknown,
}

impl DaemonMessage {
    /// Session the frame belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            DaemonMessage::SessionStarted { session_id, .. }
            | DaemonMessage::SessionStatus { session_id, .. }
            | DaemonMessage::SessionEnded { session_id, .. }
            | DaemonMessage::Messages { session_id, .. }
            | DaemonMessage::ToolResult { session_id, .. }
            | DaemonMessage::Diff { session_id, .. }
            | DaemonMessage::QuestionPrompt { session_id, .. }
            | DaemonMessage::PermissionPrompt { session_id, .. }
            | DaemonMessage::ControlRequest { session_id, .. }
            | DaemonMessage::State { session_id, .. }
            | DaemonMessage::Output { session_id, .. } => Some(session_id),
            DaemonMessage::Ping | DaemonMessage::Unknown => None,
        }
    }
}

/// Messages sent from the server to a daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonCommand {
    Registered {
        daemon_client_id: String,
    },
    UserInput {
        session_id: String,
        content: String,
    },
    Interrupt {
        session_id: String,
    },
    EndSession {
        session_id: String,
    },
    QuestionResponse {
        session_id: String,
        tool_use_id: String,
        answer: String,
    },
    PermissionResponse {
        session_id: String,
        request_id: String,
        allow: bool,
    },
    ControlResponse {
        session_id: String,
        request_id: String,
        allow: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(
            rename = "updatedInput",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        updated_input: Option<Value>,
    },
    Pong {
        timestamp: u64,
    },
    Error {
        code: String,
        message: String,
    },
}
