//! SessionLink agent hooks
//!
//! Two short-lived commands the agent runs at lifecycle points. `stop`
//! collects queued viewer feedback and hands it back as new input;
//! `session-end` tells the server the agent is gone. Both finish within
//! [`HOOK_TIMEOUT`] and never fail the agent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod api;
pub mod config;
pub mod error;
pub mod format;
pub mod session_end;
pub mod stop;

pub use api::{FeedbackApi, HttpFeedbackApi};
pub use config::HookConfig;
pub use error::HookError;

/// Hard bound on any server call made by a hook.
pub const HOOK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Fields the hooks read from the agent's stdin payload. Everything else is
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl HookInput {
    /// Unparseable input is treated as empty.
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// What a hook prints to stdout. The empty value serializes to `{}` and
/// lets the agent carry on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HookOutput {
    pub fn block(reason: String) -> Self {
        Self {
            decision: Some("block".to_string()),
            reason: Some(reason),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
