//! Async driver for `StreamCore`.
//!
//! Owns the socket and timers, feeds every input into the core and carries
//! out the actions it returns.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use sessionlink_protocol::ClientMessage;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, warn};

use crate::core::{Action, ConnectionPhase, StreamCore, StreamEvent, PING_INTERVAL};
use crate::error::StreamError;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base server URL, e.g. `ws://127.0.0.1:4100`.
    pub server_url: String,
    pub session_id: String,
    pub token: Option<String>,
    /// Start from the base index instead of live-only.
    pub replay_history: bool,
    pub ping_interval: Duration,
}

impl StreamConfig {
    pub fn new(server_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            session_id: session_id.into(),
            token: None,
            replay_history: true,
            ping_interval: PING_INTERVAL,
        }
    }

    fn session_url(&self, from_index: Option<u64>) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            base.to_string()
        };
        match from_index {
            Some(index) => format!("{base}/ws/sessions/{}?from_index={index}", self.session_id),
            None => format!("{base}/ws/sessions/{}", self.session_id),
        }
    }
}

enum Control {
    Send(ClientMessage),
    Retry,
    Destroy,
}

/// Cloneable handle to a running stream.
#[derive(Clone)]
pub struct SessionStreamHandle {
    control_tx: mpsc::UnboundedSender<Control>,
    phase_rx: watch::Receiver<ConnectionPhase>,
}

impl SessionStreamHandle {
    /// Queue a frame for the server. Dropped if the socket is not open.
    pub fn send(&self, msg: ClientMessage) -> Result<(), StreamError> {
        self.control_tx
            .send(Control::Send(msg))
            .map_err(|_| StreamError::Destroyed)
    }

    /// Reconnect after the stream gave up or completed.
    pub fn retry(&self) -> Result<(), StreamError> {
        self.control_tx
            .send(Control::Retry)
            .map_err(|_| StreamError::Destroyed)
    }

    /// Stop the stream for good. Safe to call more than once.
    pub fn destroy(&self) {
        let _ = self.control_tx.send(Control::Destroy);
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase_rx.borrow()
    }

    /// Wait for the next phase change.
    pub async fn changed(&mut self) -> Option<ConnectionPhase> {
        self.phase_rx.changed().await.ok()?;
        Some(*self.phase_rx.borrow())
    }
}

/// Start streaming a session. Events arrive on the returned receiver until
/// the stream is destroyed.
pub fn connect(config: StreamConfig) -> (SessionStreamHandle, mpsc::UnboundedReceiver<StreamEvent>) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Disconnected);

    tokio::spawn(run_stream(config, control_rx, event_tx, phase_tx));

    (
        SessionStreamHandle {
            control_tx,
            phase_rx,
        },
        event_rx,
    )
}

enum Input {
    Control(Option<Control>),
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    ReconnectTimer,
    Ping,
}

async fn run_stream(
    config: StreamConfig,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    phase_tx: watch::Sender<ConnectionPhase>,
) {
    let mut core = StreamCore::new(config.replay_history);
    let mut socket: Option<WsStream> = None;
    let mut reconnect_at: Option<Instant> = None;
    let mut ping = tokio::time::interval(ping_period(&config));
    ping.tick().await; // Skip the first immediate tick.

    let mut actions = core.connect();
    loop {
        while !actions.is_empty() {
            let mut next = Vec::new();
            for action in actions {
                match action {
                    Action::Open { from_index } => {
                        match open_socket(&config, from_index).await {
                            Ok(ws) => {
                                socket = Some(ws);
                                next.extend(core.on_open());
                            }
                            Err(e) => {
                                debug!(
                                    component = "stream",
                                    event = "stream.connect.failed",
                                    session_id = %config.session_id,
                                    error = %e,
                                    "Connect failed"
                                );
                                next.extend(core.on_close(false));
                            }
                        }
                    }
                    Action::Send(msg) => {
                        if let Some(ws) = socket.as_mut() {
                            send_json(ws, &msg).await;
                        }
                    }
                    Action::Emit(event) => {
                        let _ = event_tx.send(event);
                    }
                    Action::ScheduleReconnect { delay } => {
                        reconnect_at = Some(Instant::now() + delay);
                    }
                    Action::Close => {
                        reconnect_at = None;
                        if let Some(mut ws) = socket.take() {
                            let _ = ws.close(Some(normal_close())).await;
                        }
                    }
                }
            }
            actions = next;
        }

        phase_tx.send_replace(core.phase());
        if core.phase() == ConnectionPhase::Destroyed {
            break;
        }

        let input = tokio::select! {
            ctrl = control_rx.recv() => Input::Control(ctrl),
            frame = next_frame(&mut socket) => Input::Frame(frame),
            _ = sleep_until(reconnect_at) => Input::ReconnectTimer,
            _ = ping.tick() => Input::Ping,
        };

        actions = match input {
            Input::Control(Some(Control::Send(msg))) => {
                if core.phase() == ConnectionPhase::Connected {
                    vec![Action::Send(msg)]
                } else {
                    Vec::new()
                }
            }
            Input::Control(Some(Control::Retry)) => core.connect(),
            Input::Control(Some(Control::Destroy)) | Input::Control(None) => core.destroy(),
            Input::Frame(Some(Ok(Message::Text(text)))) => core.on_text(&text),
            Input::Frame(Some(Ok(Message::Close(frame)))) => {
                socket = None;
                let normal = frame.is_some_and(|f| f.code == CloseCode::Normal);
                core.on_close(normal)
            }
            Input::Frame(Some(Ok(_))) => Vec::new(),
            Input::Frame(Some(Err(e))) => {
                warn!(
                    component = "stream",
                    event = "stream.socket.error",
                    session_id = %config.session_id,
                    error = %e,
                    "Socket error"
                );
                socket = None;
                core.on_close(false)
            }
            Input::Frame(None) => {
                socket = None;
                core.on_close(false)
            }
            Input::ReconnectTimer => {
                reconnect_at = None;
                core.on_reconnect_timer()
            }
            Input::Ping => core.heartbeat(),
        };
    }

    debug!(
        component = "stream",
        event = "stream.destroyed",
        session_id = %config.session_id,
        "Stream destroyed"
    );
}

async fn open_socket(config: &StreamConfig, from_index: Option<u64>) -> Result<WsStream, StreamError> {
    let url = config.session_url(from_index);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|_| StreamError::InvalidUrl(url.clone()))?;
    if let Some(token) = &config.token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| StreamError::InvalidUrl(url.clone()))?;
        request.headers_mut().insert("authorization", value);
    }

    match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request)).await {
        Ok(result) => Ok(result?.0),
        Err(_) => Err(StreamError::WebSocket(
            tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            )),
        )),
    }
}

fn ping_period(config: &StreamConfig) -> Duration {
    config.ping_interval.max(MIN_PING_INTERVAL)
}

fn normal_close() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }
}

async fn send_json(ws: &mut WsStream, msg: &ClientMessage) {
    let Ok(json) = serde_json::to_string(msg) else {
        return;
    };
    // A failed send surfaces as a close on the read side.
    let _ = ws.send(Message::Text(json.into())).await;
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
