//! Hook ↔ Server HTTP bodies

use serde::{Deserialize, Serialize};

use crate::types::PendingFeedback;

/// `POST /api/feedback/claim`
///
/// `session_id` is the agent's own session id as the hook sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimFeedbackRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimFeedbackResponse {
    /// Items already moved to `approved`, in queue order.
    pub items: Vec<PendingFeedback>,
}

/// `POST /api/hooks/session-end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
