use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("socket is not connected")]
    NotConnected,
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection was stopped")]
    Stopped,
}
