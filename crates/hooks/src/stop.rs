//! Stop hook: deliver queued feedback before the agent yields.

use tracing::debug;

use crate::api::FeedbackApi;
use crate::format::format_feedback;
use crate::{HookInput, HookOutput, HOOK_TIMEOUT};

/// Claim feedback for the session and block the stop if there is any.
///
/// No session id or no server means no call at all. Errors and timeouts
/// let the stop proceed.
pub async fn run<A: FeedbackApi>(input: &HookInput, api: Option<&A>) -> HookOutput {
    let (Some(session_id), Some(api)) = (input.session_id(), api) else {
        return HookOutput::default();
    };

    let items = match tokio::time::timeout(HOOK_TIMEOUT, api.claim(session_id)).await {
        Ok(Ok(items)) => items,
        Ok(Err(e)) => {
            debug!(event = "stop.claim.failed", error = %e, "Claim failed, allowing stop");
            return HookOutput::default();
        }
        Err(_) => {
            debug!(
                event = "stop.claim.timeout",
                timeout_ms = HOOK_TIMEOUT.as_millis() as u64,
                "Claim timed out, allowing stop"
            );
            return HookOutput::default();
        }
    };

    match format_feedback(&items) {
        Some(text) => {
            debug!(event = "stop.feedback.delivered", count = items.len());
            HookOutput::block(text)
        }
        None => HookOutput::default(),
    }
}
