//! Daemon WebSocket handling
//!
//! A daemon hosts agent processes and reports them over `/ws/daemon`. Each
//! connection gets a `daemon_client_id` and becomes the only writer of the
//! sessions it starts. When the socket drops, its sessions lose their daemon
//! but stay resumable; nothing is marked complete.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use sessionlink_protocol::{
    new_id, now_millis, ClaudeState, DaemonCommand, DaemonMessage, ServerMessage, SessionStatus,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::registry::{NewSpawnedSession, RegistryError, SessionUpdate};
use crate::relay::{RelayCommand, RelayError};
use crate::state::AppState;

/// WebSocket upgrade handler for daemons
pub async fn daemon_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_daemon_socket(socket, state))
}

async fn handle_daemon_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (command_tx, mut command_rx) = mpsc::channel::<DaemonCommand>(256);
    let mut conn = DaemonConnection::new(state, command_tx);
    let daemon_client_id = conn.id.clone();

    info!(
        component = "daemon",
        event = "daemon.connection.opened",
        daemon_client_id = %daemon_client_id,
        "Daemon connected"
    );

    let send_id = daemon_client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(cmd) = command_rx.recv().await {
            let json = match serde_json::to_string(&cmd) {
                Ok(json) => json,
                Err(e) => {
                    error!(
                        component = "daemon",
                        event = "daemon.send.serialize_failed",
                        daemon_client_id = %send_id,
                        error = %e,
                        "Failed to serialize daemon command"
                    );
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    conn.reply(DaemonCommand::Registered {
        daemon_client_id: daemon_client_id.clone(),
    })
    .await;

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "daemon",
                    event = "daemon.connection.error",
                    daemon_client_id = %daemon_client_id,
                    error = %e,
                    "Daemon socket error"
                );
                break;
            }
        };

        match serde_json::from_str::<DaemonMessage>(&text) {
            Ok(msg) => conn.handle(msg).await,
            Err(e) => {
                warn!(
                    component = "daemon",
                    event = "daemon.message.parse_failed",
                    daemon_client_id = %daemon_client_id,
                    error = %e,
                    payload_bytes = text.len(),
                    "Failed to parse daemon message"
                );
                conn.reply(DaemonCommand::Error {
                    code: "parse_error".into(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    conn.disconnect().await;
    send_task.abort();
}

/// Per-connection daemon state: its id, outbound channel and the sessions
/// it owns.
pub struct DaemonConnection {
    pub id: String,
    state: Arc<AppState>,
    tx: mpsc::Sender<DaemonCommand>,
    owned: HashSet<String>,
}

impl DaemonConnection {
    pub fn new(state: Arc<AppState>, tx: mpsc::Sender<DaemonCommand>) -> Self {
        Self {
            id: new_id(),
            state,
            tx,
            owned: HashSet::new(),
        }
    }

    async fn reply(&self, cmd: DaemonCommand) {
        let _ = self.tx.send(cmd).await;
    }

    async fn reply_error(&self, code: &str, message: String) {
        self.reply(DaemonCommand::Error {
            code: code.to_string(),
            message,
        })
        .await;
    }

    pub async fn handle(&mut self, msg: DaemonMessage) {
        if let Some(session_id) = msg.session_id() {
            let starting = matches!(msg, DaemonMessage::SessionStarted { .. });
            if !starting && !self.owned.contains(session_id) {
                let message = format!("Session {session_id} is not owned by this connection");
                self.reply_error("session_not_owned", message).await;
                return;
            }
        }

        match msg {
            DaemonMessage::SessionStarted {
                session_id,
                cwd,
                harness,
                claude_session_id,
                interactive,
            } => {
                self.start_session(session_id, cwd, harness, claude_session_id, interactive)
                    .await
            }

            DaemonMessage::SessionStatus {
                session_id,
                status,
                claude_session_id,
            } => {
                if let Some(id) = &claude_session_id {
                    self.relay_send(
                        &session_id,
                        RelayCommand::SetClaudeSessionId {
                            claude_session_id: id.clone(),
                        },
                    )
                    .await;
                }
                self.update_registry(
                    &session_id,
                    SessionUpdate {
                        status: Some(status),
                        claude_session_id,
                        ..Default::default()
                    },
                );
                if status.is_terminal() {
                    let error = (status == SessionStatus::Failed).then(|| "failed".to_string());
                    self.end_session(&session_id, None, None, error).await;
                } else {
                    self.relay_send(&session_id, RelayCommand::SetStatus { status })
                        .await;
                }
            }

            DaemonMessage::SessionEnded {
                session_id,
                exit_code,
                reason,
                error,
            } => self.end_session(&session_id, exit_code, reason, error).await,

            DaemonMessage::Messages {
                session_id,
                messages,
            } => {
                self.update_registry(&session_id, SessionUpdate::default());
                self.relay_send(&session_id, RelayCommand::Append { messages })
                    .await;
            }

            DaemonMessage::State { session_id, state } => {
                let status = match state {
                    ClaudeState::Running => SessionStatus::Running,
                    ClaudeState::Waiting => SessionStatus::Waiting,
                };
                self.update_registry(
                    &session_id,
                    SessionUpdate {
                        status: Some(status),
                        ..Default::default()
                    },
                );
                self.relay_send(&session_id, RelayCommand::SetStatus { status })
                    .await;
            }

            DaemonMessage::ToolResult {
                session_id,
                tool_use_id,
                content,
                is_error,
            } => {
                let msg = ServerMessage::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                    message_index: None,
                };
                self.broadcast(&session_id, msg).await;
            }
            DaemonMessage::Diff { session_id, files } => {
                self.broadcast(&session_id, ServerMessage::Diff { files })
                    .await;
            }
            DaemonMessage::QuestionPrompt {
                session_id,
                tool_use_id,
                question,
            } => {
                let msg = ServerMessage::QuestionPrompt {
                    tool_use_id,
                    question,
                };
                self.broadcast(&session_id, msg).await;
            }
            DaemonMessage::PermissionPrompt {
                session_id,
                request_id,
                tool_name,
                input,
            } => {
                let msg = ServerMessage::PermissionPrompt {
                    request_id,
                    tool_name,
                    input,
                };
                self.broadcast(&session_id, msg).await;
            }
            DaemonMessage::ControlRequest {
                session_id,
                request_id,
                request,
            } => {
                let msg = ServerMessage::ControlRequest {
                    request_id,
                    request,
                };
                self.broadcast(&session_id, msg).await;
            }
            DaemonMessage::Output { session_id, data } => {
                self.broadcast(&session_id, ServerMessage::Output { data })
                    .await;
            }

            DaemonMessage::Ping => {
                self.reply(DaemonCommand::Pong {
                    timestamp: now_millis(),
                })
                .await;
            }

            DaemonMessage::Unknown => {
                debug!(
                    component = "daemon",
                    event = "daemon.message.unknown",
                    daemon_client_id = %self.id,
                    "Ignoring unknown daemon message"
                );
            }
        }
    }

    async fn start_session(
        &mut self,
        session_id: String,
        cwd: String,
        harness: String,
        claude_session_id: Option<String>,
        interactive: Option<bool>,
    ) {
        let relay = self.state.get_or_create_relay(&session_id);
        let attached = relay
            .attach_daemon(
                self.id.clone(),
                self.tx.clone(),
                interactive,
                claude_session_id.clone(),
            )
            .await;
        if let Err(e) = attached {
            let code = match e {
                RelayError::SessionOwned { .. } => "session_owned",
                RelayError::SessionCompleted(_) => "session_completed",
                RelayError::ActorGone(_) => "internal_error",
            };
            warn!(
                component = "daemon",
                event = "daemon.session.rejected",
                daemon_client_id = %self.id,
                session_id = %session_id,
                error = %e,
                "Rejected session claim"
            );
            self.reply_error(code, e.to_string()).await;
            return;
        }

        let mut fields = NewSpawnedSession::new(&session_id, &self.id, cwd.clone(), harness);
        fields.claude_session_id = claude_session_id.clone();
        match self.state.registry.create_session(fields) {
            Ok(_) => {}
            Err(RegistryError::AlreadyExists(_)) => {
                // Either the same daemon announcing again, or a new connection
                // taking over from one whose link is already gone. The registry
                // must follow the relay so the old connection's cleanup leaves
                // this session alone.
                if let Err(e) = self.state.registry.reassign_daemon(&session_id, &self.id) {
                    warn!(
                        component = "daemon",
                        event = "daemon.session.reassign_failed",
                        session_id = %session_id,
                        error = %e,
                        "Failed to move spawned session to this daemon"
                    );
                }
                self.update_registry(
                    &session_id,
                    SessionUpdate {
                        claude_session_id,
                        cwd: Some(cwd),
                        ..Default::default()
                    },
                );
            }
            Err(e) => {
                warn!(
                    component = "daemon",
                    event = "daemon.session.register_failed",
                    session_id = %session_id,
                    error = %e,
                    "Failed to register spawned session"
                );
            }
        }

        info!(
            component = "daemon",
            event = "daemon.session.started",
            daemon_client_id = %self.id,
            session_id = %session_id,
            "Daemon session registered"
        );
        self.owned.insert(session_id);
    }

    async fn end_session(
        &mut self,
        session_id: &str,
        exit_code: Option<i32>,
        reason: Option<String>,
        error: Option<String>,
    ) {
        let failed = error.is_some() || exit_code.is_some_and(|code| code != 0);
        let status = if failed {
            SessionStatus::Failed
        } else {
            SessionStatus::Ended
        };
        self.update_registry(
            session_id,
            SessionUpdate {
                status: Some(status),
                ..Default::default()
            },
        );
        self.relay_send(
            session_id,
            RelayCommand::Complete {
                exit_code,
                reason,
                error,
            },
        )
        .await;
        self.state.reject_feedback(session_id).await;
        self.owned.remove(session_id);
    }

    fn update_registry(&self, session_id: &str, update: SessionUpdate) {
        if let Err(e) = self.state.registry.update_session(session_id, update) {
            warn!(
                component = "daemon",
                event = "daemon.registry.update_failed",
                session_id = %session_id,
                error = %e,
                "Registry update rejected"
            );
        }
    }

    async fn relay_send(&self, session_id: &str, cmd: RelayCommand) {
        if let Some(relay) = self.state.relay(session_id) {
            relay.send(cmd).await;
        }
    }

    async fn broadcast(&self, session_id: &str, msg: ServerMessage) {
        self.relay_send(session_id, RelayCommand::Broadcast { msg })
            .await;
    }

    /// Release every session this connection still owns.
    pub async fn disconnect(self) {
        for session_id in &self.owned {
            self.relay_send(
                session_id,
                RelayCommand::DetachDaemon {
                    daemon_client_id: self.id.clone(),
                },
            )
            .await;
        }
        let removed = self.state.registry.remove_daemon(&self.id);
        info!(
            component = "daemon",
            event = "daemon.connection.closed",
            daemon_client_id = %self.id,
            orphaned_sessions = self.owned.len(),
            removed_sessions = removed.len(),
            "Daemon disconnected"
        );
    }
}
