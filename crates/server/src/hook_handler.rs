//! HTTP endpoints for the agent's Stop and SessionEnd hooks.
//!
//! Hooks run as short-lived processes with a hard timeout, so both handlers
//! answer from in-memory state without waiting on any relay round trip
//! before the response is built.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use sessionlink_protocol::hook::{ClaimFeedbackRequest, ClaimFeedbackResponse, SessionEndRequest};
use sessionlink_protocol::{now_millis, SessionStatus, SpawnedSession};
use tracing::{debug, info};

use crate::registry::SessionUpdate;
use crate::state::AppState;

/// `POST /api/feedback/claim`
///
/// Moves every pending item of the session to `approved` and returns them.
/// Items are claimed before the response exists, so a second poll (or a
/// poll whose response is lost) never sees them again.
pub async fn claim_feedback_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimFeedbackRequest>,
) -> Json<ClaimFeedbackResponse> {
    let Some(session_id) = state.resolve_hook_session(&req.session_id) else {
        debug!(
            component = "hook",
            event = "hook.claim.unknown_session",
            hook_session_id = %req.session_id,
            "Claim for unknown session"
        );
        return Json(ClaimFeedbackResponse::default());
    };

    let items = state.feedback.claim(&session_id, now_millis());
    if !items.is_empty() {
        info!(
            component = "hook",
            event = "hook.claim.delivered",
            session_id = %session_id,
            count = items.len(),
            "Feedback claimed by Stop hook"
        );
        let announce = items.clone();
        let state = state.clone();
        tokio::spawn(async move {
            state.broadcast_feedback_status(&announce).await;
        });
    }

    Json(ClaimFeedbackResponse { items })
}

/// `POST /api/hooks/session-end`
///
/// Marks the spawned session ended and rejects its pending feedback. The
/// relay log stays open; only the daemon completes it.
pub async fn session_end_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionEndRequest>,
) -> StatusCode {
    let Some(session_id) = state.resolve_hook_session(&req.session_id) else {
        return StatusCode::NO_CONTENT;
    };

    info!(
        component = "hook",
        event = "hook.session_end",
        session_id = %session_id,
        reason = ?req.reason,
        "SessionEnd hook reported"
    );

    let running = state
        .registry
        .get_session(&session_id)
        .is_some_and(|s| !s.status.is_terminal());
    if running {
        let _ = state.registry.update_session(
            &session_id,
            SessionUpdate {
                status: Some(SessionStatus::Ended),
                ..Default::default()
            },
        );
    }

    let rejected = state.feedback.reject_pending(&session_id, now_millis());
    if !rejected.is_empty() {
        tokio::spawn(async move {
            state.broadcast_feedback_status(&rejected).await;
        });
    }

    StatusCode::NO_CONTENT
}

/// `GET /api/sessions`
pub async fn list_sessions_handler(State(state): State<Arc<AppState>>) -> Json<Vec<SpawnedSession>> {
    let mut sessions = state.registry.get_active_sessions();
    sessions.sort_by_key(|s| s.created_at);
    Json(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::feedback::NewFeedback;
    use crate::registry::NewSpawnedSession;
    use sessionlink_protocol::{FeedbackStatus, FeedbackType};

    fn state_with_session() -> Arc<AppState> {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let mut fields = NewSpawnedSession::new("s1", "d1", "/tmp/repo", "claude");
        fields.status = SessionStatus::Running;
        fields.claude_session_id = Some("inner-1".into());
        state.registry.create_session(fields).unwrap();
        state
    }

    fn enqueue(state: &AppState, content: &str) {
        state.feedback.enqueue(
            "s1",
            NewFeedback {
                feedback_type: FeedbackType::UserMessage,
                content: content.into(),
                context: None,
            },
            now_millis(),
        );
    }

    async fn claim(state: &Arc<AppState>, hook_session_id: &str) -> ClaimFeedbackResponse {
        let Json(resp) = claim_feedback_handler(
            State(state.clone()),
            Json(ClaimFeedbackRequest {
                session_id: hook_session_id.into(),
            }),
        )
        .await;
        resp
    }

    #[tokio::test]
    async fn claim_returns_items_once_by_inner_session_id() {
        let state = state_with_session();
        enqueue(&state, "first");
        enqueue(&state, "second");

        let resp = claim(&state, "inner-1").await;
        let contents: Vec<&str> = resp.items.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert!(resp
            .items
            .iter()
            .all(|i| i.status == FeedbackStatus::Approved));

        assert!(claim(&state, "inner-1").await.items.is_empty());
    }

    #[tokio::test]
    async fn claim_for_unknown_session_is_empty() {
        let state = state_with_session();
        enqueue(&state, "first");
        assert!(claim(&state, "someone-else").await.items.is_empty());
        assert_eq!(state.feedback.pending_count("s1"), 1);
    }

    #[tokio::test]
    async fn session_end_marks_ended_and_rejects_pending() {
        let state = state_with_session();
        enqueue(&state, "never delivered");

        let status = session_end_handler(
            State(state.clone()),
            Json(SessionEndRequest {
                session_id: "inner-1".into(),
                reason: Some("logout".into()),
            }),
        )
        .await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            state.registry.get_session("s1").unwrap().status,
            SessionStatus::Ended
        );
        let items = state.feedback.items("s1");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, FeedbackStatus::Rejected);
    }

    #[tokio::test]
    async fn list_shows_only_active_sessions() {
        let state = state_with_session();
        state
            .registry
            .create_session(NewSpawnedSession::new("s2", "d1", "/tmp", "claude"))
            .unwrap();

        let Json(sessions) = list_sessions_handler(State(state)).await;
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);
    }
}
