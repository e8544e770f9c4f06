//! SessionEnd hook: best-effort notice that the agent session is over.

use tracing::debug;

use crate::api::FeedbackApi;
use crate::{HookInput, HOOK_TIMEOUT};

/// Notify the server. Never fails and never waits past the timeout.
pub async fn run<A: FeedbackApi>(input: &HookInput, api: Option<&A>) {
    let (Some(session_id), Some(api)) = (input.session_id(), api) else {
        return;
    };

    let call = api.session_end(session_id, input.reason.clone());
    match tokio::time::timeout(HOOK_TIMEOUT, call).await {
        Ok(Ok(())) => debug!(event = "session_end.notified"),
        Ok(Err(e)) => debug!(event = "session_end.failed", error = %e),
        Err(_) => debug!(
            event = "session_end.timeout",
            timeout_ms = HOOK_TIMEOUT.as_millis() as u64
        ),
    }
}
