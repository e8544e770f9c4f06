//! Server → Viewer messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::*;

/// Messages sent from the server to a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Snapshot sent as soon as a viewer socket opens
    Connected {
        session_id: String,
        status: SessionStatus,
        message_count: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_index: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interactive: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claude_state: Option<ClaudeState>,
    },

    // Indexed log records
    Message {
        index: u64,
        messages: Vec<Value>,
    },

    // Live-only frames
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_index: Option<u64>,
    },
    Diff {
        files: Vec<Value>,
    },
    QuestionPrompt {
        tool_use_id: String,
        question: Value,
    },
    PermissionPrompt {
        request_id: String,
        tool_name: String,
        input: Value,
    },
    ControlRequest {
        request_id: String,
        request: Value,
    },
    State {
        state: ClaudeState,
    },
    Output {
        data: String,
    },

    // Lifecycle
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_message_count: Option<u64>,
    },
    DaemonDisconnected {
        session_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        can_resume: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        claude_session_id: Option<String>,
    },

    // Keepalive
    Heartbeat {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },

    // Feedback
    FeedbackQueued {
        message_id: String,
        position: usize,
    },
    FeedbackStatus {
        message_id: String,
        status: FeedbackStatus,
    },

    // Errors
    Error {
        code: String,
        message: String,
    },

    /// Any tag this build does not know. Viewers ignore it.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServerMessage;
    use crate::types::*;

    #[test]
    fn connected_omits_absent_fields() {
        let msg = ServerMessage::Connected {
            session_id: "sess-1".to_string(),
            status: SessionStatus::Starting,
            message_count: 0,
            last_index: None,
            interactive: None,
            claude_state: None,
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "connected");
        assert_eq!(json["status"], "starting");
        assert!(json.get("last_index").is_none());
        assert!(json.get("claude_state").is_none());
    }

    #[test]
    fn roundtrip_message_frame() {
        let msg = ServerMessage::Message {
            index: 4,
            messages: vec![serde_json::json!({"role": "assistant", "text": "hi"})],
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        let reparsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(reparsed, msg);
    }

    #[test]
    fn daemon_disconnected_is_distinct_from_complete() {
        let raw = r#"{"type":"daemon_disconnected","session_id":"s","message":"gone","can_resume":true}"#;
        let msg: ServerMessage = serde_json::from_str(raw).expect("deserialize");
        match msg {
            ServerMessage::DaemonDisconnected {
                can_resume,
                claude_session_id,
                ..
            } => {
                assert_eq!(can_resume, Some(true));
                assert!(claude_session_id.is_none());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
