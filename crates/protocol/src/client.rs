//! Viewer → Server messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from a viewer to the server over a session socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Stream control
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_index: Option<u64>,
    },
    Ping,

    // Feedback
    UserMessage {
        content: String,
    },
    DiffComment {
        file: String,
        line: u32,
        content: String,
    },
    SuggestedEdit {
        file: String,
        old_content: String,
        new_content: String,
    },

    // Interactive control, forwarded to the owning daemon
    Interrupt,
    EndSession,
    QuestionResponse {
        tool_use_id: String,
        answer: String,
    },
    PermissionResponse {
        request_id: String,
        allow: bool,
    },
    ControlResponse {
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

    /// Any tag this build does not know. Ignored by the server.
    #[serde(other)]
    Unknown,
}
