//! Viewer WebSocket handling
//!
//! One socket per viewer per session at `/ws/sessions/{session_id}`. The
//! viewer may pass `?from_index=` to resume; the relay then sends the
//! `connected` snapshot followed by the replay before any live frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use sessionlink_protocol::{
    now_millis, ClaudeState, ClientMessage, DaemonCommand, FeedbackType, ServerMessage,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::feedback::NewFeedback;
use crate::relay::{subscriber_channel, RelayCommand, RelayHandle, SubscriberRx};
use crate::state::AppState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Close code sent when the relay drops a viewer. Not a normal closure, so
/// clients reconnect and resume.
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Frames queued for the socket that do not come from the relay.
enum OutboundMessage {
    Json(ServerMessage),
    Pong(Bytes),
    Close { code: u16, reason: &'static str },
}

#[derive(Debug, Default, Deserialize)]
pub struct ViewerParams {
    pub from_index: Option<u64>,
}

/// WebSocket upgrade handler for viewers
pub async fn viewer_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(params): Query<ViewerParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_viewer_socket(socket, state, session_id, params.from_index))
}

async fn handle_viewer_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    from_index: Option<u64>,
) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        session_id = %session_id,
        from_index = ?from_index,
        "Viewer connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    let Some(relay) = state.relay(&session_id) else {
        let msg = ServerMessage::error(
            "session_not_found",
            format!("No live session {session_id}"),
        );
        if let Ok(json) = serde_json::to_string(&msg) {
            let _ = ws_tx.send(Message::Text(json.into())).await;
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    };

    let (sub_tx, sub_rx) = subscriber_channel();
    relay
        .send(RelayCommand::Attach {
            conn_id,
            from_index,
            tx: sub_tx,
        })
        .await;

    let send_task = tokio::spawn(send_loop(ws_tx, sub_rx, outbound_rx, conn_id));

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                debug!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Viewer sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = text.len(),
                    "Failed to parse viewer message"
                );
                send_json(&outbound_tx, ServerMessage::error("parse_error", e.to_string())).await;
                continue;
            }
        };

        handle_client_message(client_msg, &outbound_tx, &state, &relay, conn_id).await;
    }

    relay.send(RelayCommand::Detach { conn_id }).await;
    send_task.abort();
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        session_id = %session_id,
        "Viewer connection closed"
    );
}

/// Write relay frames and direct replies to the socket until either side
/// goes away.
async fn send_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut sub_rx: SubscriberRx,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    conn_id: u64,
) {
    loop {
        let outbound = tokio::select! {
            frame = sub_rx.recv() => match frame {
                Some(msg) => OutboundMessage::Json(msg),
                // Dropped by the relay: make the viewer reconnect and resume.
                None => OutboundMessage::Close {
                    code: CLOSE_TRY_AGAIN_LATER,
                    reason: "subscriber dropped",
                },
            },
            direct = outbound_rx.recv() => match direct {
                Some(msg) => msg,
                None => break,
            },
        };

        let result = match outbound {
            OutboundMessage::Json(msg) => match serde_json::to_string(&msg) {
                Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                Err(e) => {
                    error!(
                        component = "websocket",
                        event = "ws.send.serialize_failed",
                        connection_id = conn_id,
                        error = %e,
                        "Failed to serialize server message"
                    );
                    continue;
                }
            },
            OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            OutboundMessage::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }
        };

        if result.is_err() {
            debug!(
                component = "websocket",
                event = "ws.send.disconnected",
                connection_id = conn_id,
                "WebSocket send failed, viewer disconnected"
            );
            break;
        }
    }
}

async fn send_json(tx: &mpsc::Sender<OutboundMessage>, msg: ServerMessage) {
    let _ = tx.send(OutboundMessage::Json(msg)).await;
}

async fn handle_client_message(
    msg: ClientMessage,
    client_tx: &mpsc::Sender<OutboundMessage>,
    state: &Arc<AppState>,
    relay: &RelayHandle,
    conn_id: u64,
) {
    debug!(
        component = "websocket",
        event = "ws.message.received",
        connection_id = conn_id,
        message = ?msg,
        "Received viewer message"
    );

    if let Some(feedback) = NewFeedback::from_client_message(&msg) {
        queue_feedback(feedback, client_tx, state, relay).await;
        return;
    }

    let session_id = relay.id.clone();
    let forward = match msg {
        ClientMessage::Subscribe { from_index } => {
            relay
                .send(RelayCommand::Subscribe {
                    conn_id,
                    from_index,
                })
                .await;
            return;
        }
        ClientMessage::Ping => {
            send_json(
                client_tx,
                ServerMessage::Pong {
                    timestamp: now_millis(),
                },
            )
            .await;
            return;
        }
        ClientMessage::Interrupt => DaemonCommand::Interrupt { session_id },
        ClientMessage::EndSession => DaemonCommand::EndSession { session_id },
        ClientMessage::QuestionResponse {
            tool_use_id,
            answer,
        } => DaemonCommand::QuestionResponse {
            session_id,
            tool_use_id,
            answer,
        },
        ClientMessage::PermissionResponse { request_id, allow } => {
            DaemonCommand::PermissionResponse {
                session_id,
                request_id,
                allow,
            }
        }
        ClientMessage::ControlResponse {
            request_id,
            allow,
            message,
            updated_input,
        } => DaemonCommand::ControlResponse {
            session_id,
            request_id,
            allow,
            message,
            updated_input,
        },
        ClientMessage::UserMessage { .. }
        | ClientMessage::DiffComment { .. }
        | ClientMessage::SuggestedEdit { .. }
        | ClientMessage::Unknown => return,
    };

    if !relay.to_daemon(forward).await {
        send_json(
            client_tx,
            ServerMessage::error("daemon_unavailable", "No daemon is attached to this session"),
        )
        .await;
    }
}

async fn queue_feedback(
    feedback: NewFeedback,
    client_tx: &mpsc::Sender<OutboundMessage>,
    state: &Arc<AppState>,
    relay: &RelayHandle,
) {
    let snap = relay.snapshot();
    if snap.completed {
        send_json(
            client_tx,
            ServerMessage::error("session_completed", "Session has already completed"),
        )
        .await;
        return;
    }

    let is_plain_message = feedback.feedback_type == FeedbackType::UserMessage;
    let (item, position) = state.feedback.enqueue(&relay.id, feedback, now_millis());
    info!(
        component = "feedback",
        event = "feedback.queued",
        session_id = %relay.id,
        message_id = %item.id,
        position = position,
        "Feedback queued"
    );
    send_json(
        client_tx,
        ServerMessage::FeedbackQueued {
            message_id: item.id.clone(),
            position,
        },
    )
    .await;

    // An idle interactive agent will not hit its Stop hook again, so hand a
    // plain message straight to the daemon.
    let idle = snap.interactive == Some(true)
        && snap.claude_state == Some(ClaudeState::Waiting)
        && snap.daemon_client_id.is_some();
    if !(idle && is_plain_message) {
        return;
    }
    let Some(claimed) = state.feedback.claim_item(&relay.id, &item.id, now_millis()) else {
        return;
    };
    let delivered = relay
        .to_daemon(DaemonCommand::UserInput {
            session_id: relay.id.clone(),
            content: claimed.content.clone(),
        })
        .await;
    if delivered {
        state.broadcast_feedback_status(&[claimed]).await;
    } else {
        // Daemon went away in between; leave it for the Stop hook.
        state.feedback.release_item(&relay.id, &claimed.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::relay::RelaySnapshot;
    use sessionlink_protocol::{FeedbackStatus, SessionStatus};

    fn user_message(content: &str) -> NewFeedback {
        NewFeedback::from_client_message(&ClientMessage::UserMessage {
            content: content.into(),
        })
        .unwrap()
    }

    async fn wait_for(relay: &RelayHandle, ready: impl Fn(&RelaySnapshot) -> bool) {
        for _ in 0..100 {
            if ready(&relay.snapshot()) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("relay never reached the expected state");
    }

    /// Interactive session whose agent is waiting for input.
    async fn idle_session(state: &AppState, daemon_tx: mpsc::Sender<DaemonCommand>) -> RelayHandle {
        let relay = state.get_or_create_relay("s1");
        relay
            .attach_daemon("d1".into(), daemon_tx, Some(true), None)
            .await
            .unwrap();
        relay
            .send(RelayCommand::SetStatus {
                status: SessionStatus::Running,
            })
            .await;
        relay
            .send(RelayCommand::SetStatus {
                status: SessionStatus::Waiting,
            })
            .await;
        wait_for(&relay, |s| s.claude_state == Some(ClaudeState::Waiting)).await;
        relay
    }

    async fn next_reply(rx: &mut mpsc::Receiver<OutboundMessage>) -> ServerMessage {
        match rx.recv().await {
            Some(OutboundMessage::Json(msg)) => msg,
            _ => panic!("expected a JSON reply"),
        }
    }

    #[tokio::test]
    async fn idle_agent_gets_message_directly() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let (daemon_tx, mut daemon_rx) = mpsc::channel(8);
        let relay = idle_session(&state, daemon_tx).await;
        let (sub_tx, mut sub_rx) = subscriber_channel();
        relay
            .send(RelayCommand::Attach {
                conn_id: 1,
                from_index: None,
                tx: sub_tx,
            })
            .await;
        let (client_tx, mut client_rx) = mpsc::channel(8);

        queue_feedback(user_message("try again"), &client_tx, &state, &relay).await;

        let message_id = match next_reply(&mut client_rx).await {
            ServerMessage::FeedbackQueued {
                message_id,
                position,
            } => {
                assert_eq!(position, 1);
                message_id
            }
            other => panic!("expected feedback_queued, got {other:?}"),
        };
        match daemon_rx.recv().await {
            Some(DaemonCommand::UserInput {
                session_id,
                content,
            }) => {
                assert_eq!(session_id, "s1");
                assert_eq!(content, "try again");
            }
            other => panic!("expected user_input, got {other:?}"),
        }
        loop {
            match sub_rx.recv().await {
                Some(ServerMessage::FeedbackStatus {
                    message_id: id,
                    status,
                }) => {
                    assert_eq!(id, message_id);
                    assert_eq!(status, FeedbackStatus::Approved);
                    break;
                }
                Some(_) => continue,
                None => panic!("viewer dropped"),
            }
        }
        // Already delivered, so the Stop hook finds nothing.
        assert!(state.feedback.claim("s1", now_millis()).is_empty());
    }

    #[tokio::test]
    async fn message_returns_to_queue_when_daemon_is_gone() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let (daemon_tx, daemon_rx) = mpsc::channel(8);
        let relay = idle_session(&state, daemon_tx).await;
        drop(daemon_rx);
        let (client_tx, mut client_rx) = mpsc::channel(8);

        queue_feedback(user_message("still there?"), &client_tx, &state, &relay).await;

        assert!(matches!(
            next_reply(&mut client_rx).await,
            ServerMessage::FeedbackQueued { position: 1, .. }
        ));
        assert_eq!(state.feedback.pending_count("s1"), 1);
        let claimed = state.feedback.claim("s1", now_millis());
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].content, "still there?");
    }

    #[tokio::test]
    async fn completed_session_refuses_feedback() {
        let state = Arc::new(AppState::new(ServerConfig::default()));
        let relay = state.get_or_create_relay("s1");
        relay
            .send(RelayCommand::Complete {
                exit_code: Some(0),
                reason: None,
                error: None,
            })
            .await;
        wait_for(&relay, |s| s.completed).await;
        let (client_tx, mut client_rx) = mpsc::channel(8);

        queue_feedback(user_message("too late"), &client_tx, &state, &relay).await;

        match next_reply(&mut client_rx).await {
            ServerMessage::Error { code, .. } => assert_eq!(code, "session_completed"),
            other => panic!("expected session_completed, got {other:?}"),
        }
        assert_eq!(state.feedback.pending_count("s1"), 0);
        assert!(state.feedback.items("s1").is_empty());
    }
}
