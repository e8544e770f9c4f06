//! Relay actor: owns a session's log and subscribers and processes commands
//! sequentially.
//!
//! External callers talk to it through `RelayHandle`, which sends
//! `RelayCommand` messages over an mpsc channel. Lock-free reads go through
//! `ArcSwap`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde_json::Value;
use sessionlink_protocol::{now_millis, ClaudeState, DaemonCommand, ServerMessage, SessionStatus};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::command::RelayCommand;
use super::log::MessageLog;
use super::subscriber::{Delivery, SubscriberTx};
use super::RelayError;

/// Read-only view of a relay, refreshed after every command.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub message_count: u64,
    pub last_index: Option<u64>,
    pub interactive: Option<bool>,
    pub claude_state: Option<ClaudeState>,
    pub claude_session_id: Option<String>,
    pub daemon_client_id: Option<String>,
    pub completed: bool,
    /// Unix millis
    pub completed_at: Option<u64>,
    pub subscriber_count: usize,
}

struct DaemonLink {
    client_id: String,
    tx: mpsc::Sender<DaemonCommand>,
}

#[derive(Clone)]
struct Completion {
    exit_code: Option<i32>,
    reason: Option<String>,
    error: Option<String>,
    at: u64,
}

/// A viewer and the log range `[floor, next)` it has been sent on this
/// connection. `next` always equals the log length once attached.
struct Subscriber {
    tx: SubscriberTx,
    floor: u64,
    next: u64,
}

/// State owned by the relay actor.
pub struct RelaySession {
    id: String,
    log: MessageLog,
    status: SessionStatus,
    interactive: Option<bool>,
    claude_state: Option<ClaudeState>,
    claude_session_id: Option<String>,
    daemon: Option<DaemonLink>,
    subscribers: BTreeMap<u64, Subscriber>,
    completion: Option<Completion>,
    snapshot: Arc<ArcSwap<RelaySnapshot>>,
}

impl RelaySession {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let snapshot = Arc::new(ArcSwap::from_pointee(RelaySnapshot {
            session_id: id.clone(),
            status: SessionStatus::Starting,
            message_count: 0,
            last_index: None,
            interactive: None,
            claude_state: None,
            claude_session_id: None,
            daemon_client_id: None,
            completed: false,
            completed_at: None,
            subscriber_count: 0,
        }));
        Self {
            id,
            log: MessageLog::new(),
            status: SessionStatus::Starting,
            interactive: None,
            claude_state: None,
            claude_session_id: None,
            daemon: None,
            subscribers: BTreeMap::new(),
            completion: None,
            snapshot,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot_arc(&self) -> Arc<ArcSwap<RelaySnapshot>> {
        self.snapshot.clone()
    }

    pub fn handle_command(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Attach {
                conn_id,
                from_index,
                tx,
            } => self.attach(conn_id, from_index, tx),
            RelayCommand::Subscribe {
                conn_id,
                from_index,
            } => self.subscribe(conn_id, from_index),
            RelayCommand::Detach { conn_id } => {
                self.subscribers.remove(&conn_id);
            }
            RelayCommand::AttachDaemon {
                daemon_client_id,
                tx,
                interactive,
                claude_session_id,
                reply,
            } => {
                let result =
                    self.attach_daemon(daemon_client_id, tx, interactive, claude_session_id);
                // Callers read the snapshot right after the reply.
                self.refresh_snapshot();
                let _ = reply.send(result);
            }
            RelayCommand::DetachDaemon { daemon_client_id } => {
                self.detach_daemon(&daemon_client_id)
            }
            RelayCommand::Append { messages } => self.append(messages),
            RelayCommand::Broadcast { msg } => self.broadcast(msg),
            RelayCommand::SetStatus { status } => self.set_status(status),
            RelayCommand::SetClaudeSessionId { claude_session_id } => {
                self.claude_session_id = Some(claude_session_id);
            }
            RelayCommand::Complete {
                exit_code,
                reason,
                error,
            } => self.complete(Completion {
                exit_code,
                reason,
                error,
                at: now_millis(),
            }),
            RelayCommand::ToDaemon { cmd, reply } => {
                let _ = reply.send(self.to_daemon(cmd));
            }
        }
        self.refresh_snapshot();
    }

    /// Push a keepalive to every viewer.
    pub fn heartbeat(&mut self) {
        self.fanout(ServerMessage::Heartbeat {
            timestamp: now_millis(),
        });
        self.refresh_snapshot();
    }

    fn refresh_snapshot(&self) {
        self.snapshot.store(Arc::new(RelaySnapshot {
            session_id: self.id.clone(),
            status: self.status,
            message_count: self.log.len(),
            last_index: self.log.last_index(),
            interactive: self.interactive,
            claude_state: self.claude_state,
            claude_session_id: self.claude_session_id.clone(),
            daemon_client_id: self.daemon.as_ref().map(|d| d.client_id.clone()),
            completed: self.completion.is_some(),
            completed_at: self.completion.as_ref().map(|c| c.at),
            subscriber_count: self.subscribers.len(),
        }));
    }

    fn connected_frame(&self) -> ServerMessage {
        ServerMessage::Connected {
            session_id: self.id.clone(),
            status: self.status,
            message_count: self.log.len(),
            last_index: self.log.last_index(),
            interactive: self.interactive,
            claude_state: self.claude_state,
        }
    }

    fn complete_frame(&self) -> Option<ServerMessage> {
        let completion = self.completion.as_ref()?;
        Some(ServerMessage::Complete {
            exit_code: completion.exit_code,
            reason: completion.reason.clone(),
            error: completion.error.clone(),
            final_message_count: Some(self.log.len()),
        })
    }

    // -----------------------------------------------------------------------
    // Viewers
    // -----------------------------------------------------------------------

    fn attach(&mut self, conn_id: u64, from_index: Option<u64>, tx: SubscriberTx) {
        let end = self.log.len();
        if tx.push(self.connected_frame()) == Delivery::Drop {
            return;
        }

        let mut floor = end;
        if let Some(from) = from_index {
            if !self.replay(&tx, from, end) {
                return;
            }
            floor = from.min(end);
        }
        if let Some(frame) = self.complete_frame() {
            tx.push(frame);
        }

        debug!(
            component = "relay",
            event = "relay.viewer.attached",
            session_id = %self.id,
            connection_id = conn_id,
            from_index = ?from_index,
            "Viewer attached"
        );
        self.subscribers.insert(
            conn_id,
            Subscriber {
                tx,
                floor,
                next: end,
            },
        );
    }

    fn subscribe(&mut self, conn_id: u64, from_index: Option<u64>) {
        let Some(sub) = self.subscribers.get(&conn_id) else {
            return;
        };
        let from = from_index.unwrap_or(sub.next);

        // Everything in [floor, next) already went out in order. Only a
        // request below the floor needs a replay, and it has to cover up to
        // `next` again so the viewer sees the records in order.
        let mut keep = true;
        let mut new_floor = sub.floor;
        if from < sub.floor {
            keep = self.replay(&sub.tx, from, sub.next);
            new_floor = from;
        }
        if keep {
            if let Some(frame) = self.complete_frame() {
                keep = sub.tx.push(frame) == Delivery::Sent;
            }
        }

        if keep {
            if let Some(sub) = self.subscribers.get_mut(&conn_id) {
                sub.floor = new_floor;
            }
        } else {
            self.subscribers.remove(&conn_id);
        }
    }

    /// Push records `[from, end)` to one viewer. `false` if it went away.
    fn replay(&self, tx: &SubscriberTx, from: u64, end: u64) -> bool {
        let records = self.log.since(from);
        let count = end.saturating_sub(from) as usize;
        for record in records.iter().take(count) {
            let frame = ServerMessage::Message {
                index: record.index,
                messages: vec![record.payload.clone()],
            };
            if tx.push(frame) == Delivery::Drop {
                return false;
            }
        }
        debug!(
            component = "relay",
            event = "relay.viewer.replay",
            session_id = %self.id,
            from_index = from,
            replay_count = count.min(records.len()),
            "Replayed log to viewer"
        );
        true
    }

    /// Deliver a frame to every viewer, evicting the ones that cannot take it.
    fn fanout(&mut self, msg: ServerMessage) {
        let session_id = &self.id;
        self.subscribers.retain(|conn_id, sub| {
            if sub.tx.push_live(msg.clone()) == Delivery::Sent {
                return true;
            }
            warn!(
                component = "relay",
                event = "relay.viewer.evicted",
                session_id = %session_id,
                connection_id = *conn_id,
                backlog = sub.tx.backlog(),
                "Dropping viewer that is closed or too far behind"
            );
            false
        });
    }

    // -----------------------------------------------------------------------
    // Daemon
    // -----------------------------------------------------------------------

    fn attach_daemon(
        &mut self,
        daemon_client_id: String,
        tx: mpsc::Sender<DaemonCommand>,
        interactive: Option<bool>,
        claude_session_id: Option<String>,
    ) -> Result<(), RelayError> {
        if self.completion.is_some() {
            return Err(RelayError::SessionCompleted(self.id.clone()));
        }
        if let Some(existing) = &self.daemon {
            if existing.client_id != daemon_client_id && !existing.tx.is_closed() {
                return Err(RelayError::SessionOwned {
                    session_id: self.id.clone(),
                    owner: existing.client_id.clone(),
                });
            }
        }

        info!(
            component = "relay",
            event = "relay.daemon.attached",
            session_id = %self.id,
            daemon_client_id = %daemon_client_id,
            "Daemon attached"
        );
        self.daemon = Some(DaemonLink {
            client_id: daemon_client_id,
            tx,
        });
        if interactive.is_some() {
            self.interactive = interactive;
        }
        if claude_session_id.is_some() {
            self.claude_session_id = claude_session_id;
        }
        Ok(())
    }

    fn detach_daemon(&mut self, daemon_client_id: &str) {
        let owned = self
            .daemon
            .as_ref()
            .is_some_and(|d| d.client_id == daemon_client_id);
        if !owned {
            return;
        }
        self.daemon = None;

        // Only the daemon can declare the session complete.
        if self.completion.is_none() {
            warn!(
                component = "relay",
                event = "relay.daemon.lost",
                session_id = %self.id,
                daemon_client_id = %daemon_client_id,
                "Daemon disconnected before session completed"
            );
            self.fanout(ServerMessage::DaemonDisconnected {
                session_id: self.id.clone(),
                message: "Daemon connection lost".to_string(),
                can_resume: Some(self.claude_session_id.is_some()),
                claude_session_id: self.claude_session_id.clone(),
            });
        }
    }

    fn append(&mut self, messages: Vec<Value>) {
        let now = now_millis();
        for payload in messages {
            let frame = match self.log.append(payload, now) {
                Ok(record) => ServerMessage::Message {
                    index: record.index,
                    messages: vec![record.payload.clone()],
                },
                Err(e) => {
                    warn!(
                        component = "relay",
                        event = "relay.append.rejected",
                        session_id = %self.id,
                        error = %e,
                        "Dropping daemon output after completion"
                    );
                    return;
                }
            };
            self.fanout(frame);
            for sub in self.subscribers.values_mut() {
                sub.next += 1;
            }
        }
    }

    fn broadcast(&mut self, mut msg: ServerMessage) {
        if let ServerMessage::ToolResult { message_index, .. } = &mut msg {
            if message_index.is_none() {
                *message_index = self.log.last_index();
            }
        }
        self.fanout(msg);
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.completion.is_some() || status.is_terminal() {
            // Terminal status only arrives through `Complete`.
            return;
        }
        if !self.status.can_transition_to(status) {
            warn!(
                component = "relay",
                event = "relay.status.invalid",
                session_id = %self.id,
                from = ?self.status,
                to = ?status,
                "Ignoring invalid status transition"
            );
            return;
        }
        self.status = status;

        let state = match status {
            SessionStatus::Running => ClaudeState::Running,
            SessionStatus::Waiting => ClaudeState::Waiting,
            _ => return,
        };
        if self.claude_state != Some(state) {
            self.claude_state = Some(state);
            self.fanout(ServerMessage::State { state });
        }
    }

    fn complete(&mut self, completion: Completion) {
        if self.completion.is_some() {
            return;
        }
        let failed =
            completion.error.is_some() || completion.exit_code.is_some_and(|code| code != 0);
        self.status = if failed {
            SessionStatus::Failed
        } else {
            SessionStatus::Ended
        };
        self.log.close();
        self.daemon = None;
        self.completion = Some(completion);

        info!(
            component = "relay",
            event = "relay.session.completed",
            session_id = %self.id,
            status = ?self.status,
            final_message_count = self.log.len(),
            "Session completed"
        );
        if let Some(frame) = self.complete_frame() {
            self.fanout(frame);
        }
    }

    fn to_daemon(&self, cmd: DaemonCommand) -> bool {
        match &self.daemon {
            Some(link) => link.tx.try_send(cmd).is_ok(),
            None => false,
        }
    }
}

/// Handle to a running relay actor (cheap to Clone).
#[derive(Clone)]
pub struct RelayHandle {
    pub id: String,
    command_tx: mpsc::Sender<RelayCommand>,
    snapshot: Arc<ArcSwap<RelaySnapshot>>,
}

impl RelayHandle {
    /// Spawn a relay actor for `session_id`, returning a handle.
    pub fn spawn(session_id: impl Into<String>, heartbeat_interval: Duration) -> RelayHandle {
        let session = RelaySession::new(session_id);
        let (command_tx, command_rx) = mpsc::channel(256);
        let snapshot = session.snapshot_arc();
        let id = session.id().to_string();

        tokio::spawn(relay_loop(session, command_rx, heartbeat_interval));

        RelayHandle {
            id,
            command_tx,
            snapshot,
        }
    }

    /// Send a command to the actor (fire-and-forget).
    pub async fn send(&self, cmd: RelayCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "relay",
                session_id = %self.id,
                "Relay channel closed, command dropped"
            );
        }
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<RelaySnapshot> {
        self.snapshot.load_full()
    }

    pub async fn attach_daemon(
        &self,
        daemon_client_id: String,
        tx: mpsc::Sender<DaemonCommand>,
        interactive: Option<bool>,
        claude_session_id: Option<String>,
    ) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::AttachDaemon {
            daemon_client_id,
            tx,
            interactive,
            claude_session_id,
            reply,
        })
        .await;
        rx.await
            .unwrap_or_else(|_| Err(RelayError::ActorGone(self.id.clone())))
    }

    /// Forward a viewer command to the owning daemon.
    pub async fn to_daemon(&self, cmd: DaemonCommand) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::ToDaemon { cmd, reply }).await;
        rx.await.unwrap_or(false)
    }
}

async fn relay_loop(
    mut session: RelaySession,
    mut command_rx: mpsc::Receiver<RelayCommand>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(cmd) => session.handle_command(cmd),
                None => break,
            },
            _ = heartbeat.tick() => session.heartbeat(),
        }
    }

    debug!(
        component = "relay",
        event = "relay.actor.stopped",
        session_id = %session.id(),
        "Relay actor stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::subscriber::{subscriber_channel, SubscriberRx};
    use serde_json::json;

    fn drain(rx: &mut SubscriberRx) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(Some(msg)) = rx_try(rx) {
            out.push(msg);
        }
        out
    }

    fn rx_try(rx: &mut SubscriberRx) -> Option<Option<ServerMessage>> {
        futures::FutureExt::now_or_never(rx.recv())
    }

    fn indices(frames: &[ServerMessage]) -> Vec<u64> {
        frames
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Message { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    fn append(session: &mut RelaySession, n: usize) {
        let messages = (0..n).map(|i| json!({ "i": i })).collect();
        session.handle_command(RelayCommand::Append { messages });
    }

    fn attach(session: &mut RelaySession, conn_id: u64, from_index: Option<u64>) -> SubscriberRx {
        let (tx, rx) = subscriber_channel();
        session.handle_command(RelayCommand::Attach {
            conn_id,
            from_index,
            tx,
        });
        rx
    }

    #[test]
    fn attach_sends_connected_snapshot_first() {
        let mut session = RelaySession::new("s1");
        append(&mut session, 3);
        let mut rx = attach(&mut session, 1, None);

        let frames = drain(&mut rx);
        assert_eq!(
            frames,
            vec![ServerMessage::Connected {
                session_id: "s1".into(),
                status: SessionStatus::Starting,
                message_count: 3,
                last_index: Some(2),
                interactive: None,
                claude_state: None,
            }]
        );
    }

    #[test]
    fn live_indices_increase_by_one() {
        let mut session = RelaySession::new("s1");
        let mut rx = attach(&mut session, 1, None);
        append(&mut session, 2);
        append(&mut session, 3);

        let frames = drain(&mut rx);
        assert_eq!(indices(&frames), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn attach_with_from_index_replays_then_goes_live() {
        let mut session = RelaySession::new("s1");
        append(&mut session, 5);
        let mut rx = attach(&mut session, 1, Some(2));
        append(&mut session, 2);

        let frames = drain(&mut rx);
        assert!(matches!(frames[0], ServerMessage::Connected { .. }));
        assert_eq!(indices(&frames), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn in_band_subscribe_below_floor_replays_in_order() {
        let mut session = RelaySession::new("s1");
        append(&mut session, 4);
        let mut rx = attach(&mut session, 1, None);
        append(&mut session, 2); // indices 4, 5 go out live

        session.handle_command(RelayCommand::Subscribe {
            conn_id: 1,
            from_index: Some(1),
        });
        append(&mut session, 1);

        let frames = drain(&mut rx);
        assert_eq!(indices(&frames), vec![4, 5, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn in_band_subscribe_inside_delivered_range_sends_nothing() {
        let mut session = RelaySession::new("s1");
        append(&mut session, 4);
        let mut rx = attach(&mut session, 1, Some(2));
        session.handle_command(RelayCommand::Subscribe {
            conn_id: 1,
            from_index: Some(3),
        });
        append(&mut session, 1);

        let frames = drain(&mut rx);
        assert_eq!(indices(&frames), vec![2, 3, 4]);
    }

    #[test]
    fn completion_closes_log_and_answers_late_subscribers_with_final_snapshot() {
        let mut session = RelaySession::new("s1");
        let mut live = attach(&mut session, 1, None);
        append(&mut session, 2);
        session.handle_command(RelayCommand::Complete {
            exit_code: Some(0),
            reason: Some("exited".into()),
            error: None,
        });
        append(&mut session, 1);

        let frames = drain(&mut live);
        assert_eq!(indices(&frames), vec![0, 1]);
        assert_eq!(
            frames.last(),
            Some(&ServerMessage::Complete {
                exit_code: Some(0),
                reason: Some("exited".into()),
                error: None,
                final_message_count: Some(2),
            })
        );

        let mut late = attach(&mut session, 2, Some(10));
        let frames = drain(&mut late);
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            frames[0],
            ServerMessage::Connected {
                status: SessionStatus::Ended,
                message_count: 2,
                ..
            }
        ));
        assert!(matches!(frames[1], ServerMessage::Complete { .. }));
    }

    #[test]
    fn non_zero_exit_marks_session_failed() {
        let mut session = RelaySession::new("s1");
        session.handle_command(RelayCommand::Complete {
            exit_code: Some(2),
            reason: None,
            error: None,
        });
        let snap = session.snapshot_arc().load_full();
        assert_eq!(snap.status, SessionStatus::Failed);
        assert!(snap.completed_at.is_some());
    }

    #[test]
    fn daemon_loss_is_not_completion() {
        let mut session = RelaySession::new("s1");
        let (daemon_tx, _daemon_rx) = mpsc::channel(4);
        let (reply, _) = oneshot::channel();
        session.handle_command(RelayCommand::AttachDaemon {
            daemon_client_id: "d1".into(),
            tx: daemon_tx,
            interactive: Some(true),
            claude_session_id: Some("inner".into()),
            reply,
        });
        let mut rx = attach(&mut session, 1, None);

        session.handle_command(RelayCommand::DetachDaemon {
            daemon_client_id: "d1".into(),
        });

        let frames = drain(&mut rx);
        assert_eq!(
            frames.last(),
            Some(&ServerMessage::DaemonDisconnected {
                session_id: "s1".into(),
                message: "Daemon connection lost".into(),
                can_resume: Some(true),
                claude_session_id: Some("inner".into()),
            })
        );
        let snap = session.snapshot_arc().load_full();
        assert!(!snap.completed);
        assert_eq!(snap.daemon_client_id, None);
    }

    #[test]
    fn second_daemon_cannot_claim_owned_session() {
        let mut session = RelaySession::new("s1");
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);

        let (reply, mut first) = oneshot::channel();
        session.handle_command(RelayCommand::AttachDaemon {
            daemon_client_id: "a".into(),
            tx: tx_a,
            interactive: None,
            claude_session_id: None,
            reply,
        });
        assert_eq!(first.try_recv().unwrap(), Ok(()));

        let (reply, mut second) = oneshot::channel();
        session.handle_command(RelayCommand::AttachDaemon {
            daemon_client_id: "b".into(),
            tx: tx_b,
            interactive: None,
            claude_session_id: None,
            reply,
        });
        assert_eq!(
            second.try_recv().unwrap(),
            Err(RelayError::SessionOwned {
                session_id: "s1".into(),
                owner: "a".into(),
            })
        );
    }

    #[test]
    fn tool_results_are_stamped_with_current_index() {
        let mut session = RelaySession::new("s1");
        append(&mut session, 3);
        let mut rx = attach(&mut session, 1, None);
        session.handle_command(RelayCommand::Broadcast {
            msg: ServerMessage::ToolResult {
                tool_use_id: "t1".into(),
                content: json!("ok"),
                is_error: None,
                message_index: None,
            },
        });

        let frames = drain(&mut rx);
        assert!(matches!(
            frames.last(),
            Some(ServerMessage::ToolResult {
                message_index: Some(2),
                ..
            })
        ));
    }

    #[test]
    fn status_changes_publish_agent_state_once() {
        let mut session = RelaySession::new("s1");
        let mut rx = attach(&mut session, 1, None);
        session.handle_command(RelayCommand::SetStatus {
            status: SessionStatus::Running,
        });
        session.handle_command(RelayCommand::SetStatus {
            status: SessionStatus::Running,
        });
        session.handle_command(RelayCommand::SetStatus {
            status: SessionStatus::Waiting,
        });

        let states: Vec<ClaudeState> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::State { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![ClaudeState::Running, ClaudeState::Waiting]);
    }

    #[test]
    fn closed_viewer_is_evicted_on_fanout() {
        let mut session = RelaySession::new("s1");
        let rx = attach(&mut session, 1, None);
        drop(rx);
        append(&mut session, 1);
        assert_eq!(session.snapshot_arc().load().subscriber_count, 0);
    }

    #[tokio::test]
    async fn replay_under_concurrent_writes_has_no_gaps_or_duplicates() {
        let relay = RelayHandle::spawn("s1", Duration::from_secs(3600));
        relay
            .send(RelayCommand::Append {
                messages: (0..20).map(|i| json!({ "i": i })).collect(),
            })
            .await;

        let writer = {
            let relay = relay.clone();
            tokio::spawn(async move {
                for i in 20..120 {
                    relay
                        .send(RelayCommand::Append {
                            messages: vec![json!({ "i": i })],
                        })
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let (tx, mut rx) = subscriber_channel();
        relay
            .send(RelayCommand::Attach {
                conn_id: 7,
                from_index: Some(8),
                tx,
            })
            .await;
        writer.await.unwrap();

        let mut seen = Vec::new();
        while seen.last() != Some(&119) {
            match rx.recv().await.expect("viewer channel open") {
                ServerMessage::Message { index, .. } => seen.push(index),
                _ => {}
            }
        }
        let expected: Vec<u64> = (8..120).collect();
        assert_eq!(seen, expected);
    }
}
