//! Connection state machine
//!
//! `StreamCore` holds everything that decides what the stream does next:
//! phase, last applied index and reconnect bookkeeping. It does no I/O.
//! Every input returns the `Action`s the driver must perform, which keeps
//! the ordering and backoff rules testable without sockets or timers.

use std::time::Duration;

use serde_json::Value;
use sessionlink_protocol::{ClaudeState, ClientMessage, ServerMessage, SessionStatus};

pub const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(15_000);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before reconnect attempt `attempt` (1-based):
/// `min(base * 2^(attempt-1), max)`.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    BASE_RECONNECT_DELAY
        .saturating_mul(1u32 << exponent)
        .min(MAX_RECONNECT_DELAY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Absorbing: nothing leaves this phase.
    Destroyed,
}

/// What the consumer of a stream sees.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected {
        status: SessionStatus,
        message_count: u64,
        last_index: Option<u64>,
        interactive: Option<bool>,
        claude_state: Option<ClaudeState>,
    },
    /// Next record in index order.
    Message {
        index: u64,
        messages: Vec<Value>,
    },
    /// A live frame that is not part of the log.
    Frame(ServerMessage),
    Complete {
        exit_code: Option<i32>,
        reason: Option<String>,
        error: Option<String>,
        final_message_count: Option<u64>,
    },
    /// The server's log is behind what we applied (it restarted). Everything
    /// is replayed from the base index.
    LogReset,
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Reconnect attempts are exhausted. Sent once.
    ReconnectFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a socket, resuming from `from_index` if set.
    Open { from_index: Option<u64> },
    Send(ClientMessage),
    Emit(StreamEvent),
    ScheduleReconnect { delay: Duration },
    /// Close the socket with a normal close code.
    Close,
}

#[derive(Debug)]
pub struct StreamCore {
    phase: ConnectionPhase,
    /// -1 until a record has been applied.
    last_index: i64,
    reconnect_attempts: u32,
    /// A catch-up `subscribe` is in flight; don't send another.
    resync_pending: bool,
    /// Replay the whole log on first connect instead of starting live.
    replay_history: bool,
    /// The current socket was opened with a `from_index`.
    opened_with_index: bool,
}

impl StreamCore {
    pub fn new(replay_history: bool) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            last_index: -1,
            reconnect_attempts: 0,
            resync_pending: false,
            replay_history,
            opened_with_index: false,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn last_index(&self) -> i64 {
        self.last_index
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    fn resume_index(&self) -> Option<u64> {
        if self.last_index >= 0 {
            Some((self.last_index + 1) as u64)
        } else if self.replay_history {
            Some(0)
        } else {
            None
        }
    }

    fn open(&mut self) -> Vec<Action> {
        self.phase = ConnectionPhase::Connecting;
        let from_index = self.resume_index();
        self.opened_with_index = from_index.is_some();
        vec![Action::Open { from_index }]
    }

    /// Start (or manually retry) the stream.
    pub fn connect(&mut self) -> Vec<Action> {
        match self.phase {
            ConnectionPhase::Disconnected => {
                self.reconnect_attempts = 0;
                self.open()
            }
            _ => Vec::new(),
        }
    }

    /// The socket opened.
    pub fn on_open(&mut self) -> Vec<Action> {
        if self.phase != ConnectionPhase::Connecting {
            return Vec::new();
        }
        self.phase = ConnectionPhase::Connected;
        self.reconnect_attempts = 0;
        self.resync_pending = false;

        if self.last_index >= 0 {
            let from_index = Some((self.last_index + 1) as u64);
            return vec![Action::Send(ClientMessage::Subscribe { from_index })];
        }
        Vec::new()
    }

    /// Periodic keepalive tick.
    pub fn heartbeat(&mut self) -> Vec<Action> {
        if self.phase == ConnectionPhase::Connected {
            vec![Action::Send(ClientMessage::Ping)]
        } else {
            Vec::new()
        }
    }

    /// A text frame arrived. Anything that does not parse is dropped.
    pub fn on_text(&mut self, text: &str) -> Vec<Action> {
        if self.phase != ConnectionPhase::Connected {
            return Vec::new();
        }
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => self.on_message(msg),
            Err(_) => Vec::new(),
        }
    }

    pub fn on_message(&mut self, msg: ServerMessage) -> Vec<Action> {
        match msg {
            ServerMessage::Connected {
                status,
                message_count,
                last_index,
                interactive,
                claude_state,
                ..
            } => {
                let server_last = last_index.map_or(-1, |i| i as i64);
                let mut actions = Vec::new();
                if server_last < self.last_index {
                    self.last_index = -1;
                    self.resync_pending = true;
                    actions.push(Action::Emit(StreamEvent::LogReset));
                    actions.push(Action::Send(ClientMessage::Subscribe {
                        from_index: Some(0),
                    }));
                } else if self.last_index < 0 && !self.opened_with_index {
                    self.last_index = server_last;
                }
                actions.insert(
                    0,
                    Action::Emit(StreamEvent::Connected {
                        status,
                        message_count,
                        last_index,
                        interactive,
                        claude_state,
                    }),
                );
                actions
            }

            ServerMessage::Message { index, messages } => {
                let index_i = index as i64;
                if index_i <= self.last_index {
                    return Vec::new();
                }
                if index_i == self.last_index + 1 {
                    self.last_index = index_i;
                    self.resync_pending = false;
                    return vec![Action::Emit(StreamEvent::Message { index, messages })];
                }
                if self.resync_pending {
                    return Vec::new();
                }
                self.resync_pending = true;
                vec![Action::Send(ClientMessage::Subscribe {
                    from_index: Some((self.last_index + 1) as u64),
                })]
            }

            ServerMessage::Complete {
                exit_code,
                reason,
                error,
                final_message_count,
            } => {
                self.phase = ConnectionPhase::Disconnected;
                vec![
                    Action::Emit(StreamEvent::Complete {
                        exit_code,
                        reason,
                        error,
                        final_message_count,
                    }),
                    Action::Close,
                ]
            }

            ServerMessage::Heartbeat { .. } | ServerMessage::Pong { .. } | ServerMessage::Unknown => {
                Vec::new()
            }

            other => vec![Action::Emit(StreamEvent::Frame(other))],
        }
    }

    /// The socket closed or could not be opened. `normal` is a clean close
    /// requested by either side.
    pub fn on_close(&mut self, normal: bool) -> Vec<Action> {
        match self.phase {
            ConnectionPhase::Connecting | ConnectionPhase::Connected => {}
            _ => return Vec::new(),
        }
        if normal {
            self.phase = ConnectionPhase::Disconnected;
            return Vec::new();
        }

        if self.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
            self.phase = ConnectionPhase::Disconnected;
            return vec![Action::Emit(StreamEvent::ReconnectFailed)];
        }
        self.reconnect_attempts += 1;
        self.phase = ConnectionPhase::Reconnecting;
        let delay = reconnect_delay(self.reconnect_attempts);
        vec![
            Action::Emit(StreamEvent::Reconnecting {
                attempt: self.reconnect_attempts,
                delay,
            }),
            Action::ScheduleReconnect { delay },
        ]
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_timer(&mut self) -> Vec<Action> {
        if self.phase != ConnectionPhase::Reconnecting {
            return Vec::new();
        }
        self.open()
    }

    /// Tear the stream down for good. Idempotent.
    pub fn destroy(&mut self) -> Vec<Action> {
        if self.phase == ConnectionPhase::Destroyed {
            return Vec::new();
        }
        self.phase = ConnectionPhase::Destroyed;
        vec![Action::Close]
    }
}
