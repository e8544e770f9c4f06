//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Lifecycle status of a spawned session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Waiting,
    Ended,
    Failed,
}

impl SessionStatus {
    /// `ended` and `failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Failed)
    }

    /// Sessions that are attached to a live process doing or awaiting work.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Waiting)
    }

    /// Whether `self -> next` follows
    /// `starting -> running -> {waiting <-> running}* -> {ended | failed}`.
    ///
    /// A process can also die before it ever runs, so `starting` may go
    /// straight to a terminal state. Staying in place is always allowed.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if self == next {
            return true;
        }
        match self {
            Starting => matches!(next, Running | Ended | Failed),
            Running => matches!(next, Waiting | Ended | Failed),
            Waiting => matches!(next, Running | Ended | Failed),
            Ended | Failed => false,
        }
    }
}

/// What the agent inside the session is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaudeState {
    Running,
    Waiting,
}

/// Kind of feedback a viewer can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    UserMessage,
    DiffComment,
    SuggestedEdit,
}

/// Feedback status. Everything except `pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl FeedbackStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, FeedbackStatus::Pending)
    }
}

/// A piece of viewer feedback waiting to be delivered through the Stop hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFeedback {
    pub id: String,
    pub session_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub status: FeedbackStatus,
    /// Unix millis
    pub queued_at: u64,
}

/// Public view of a daemon-spawned session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnedSession {
    pub id: String,
    pub daemon_client_id: String,
    pub cwd: String,
    pub harness: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_session_id: Option<String>,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis
    pub last_activity_at: u64,
}
