use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream has been destroyed")]
    Destroyed,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
