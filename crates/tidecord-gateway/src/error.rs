use thiserror::Error;
use tidecord_http::HttpError;
use tidecord_models::Snowflake;
use tidecord_voice::VoiceError;
use tidecord_ws::ConnectionError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a bot token is required")]
    MissingToken,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("http error: {0}")]
    Http(#[from] HttpError),
    #[error("gateway error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("voice error: {0}")]
    Voice(#[from] VoiceError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no voice connection for guild {0}")]
    NoVoice(Snowflake),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}
