use std::io;

use thiserror::Error;
use tidecord_ws::ConnectionError;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("IP discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("voice protocol error: {0}")]
    Protocol(String),
    #[error("voice session is not ready")]
    NotReady,
    #[error("server offered no supported encryption mode (offered: {0:?})")]
    UnsupportedModes(Vec<String>),
    #[error("invalid Ogg stream: {0}")]
    InvalidOgg(String),
    #[error("audio source error: {0}")]
    Source(String),
    #[error("audio player has shut down")]
    PlayerClosed,
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("unknown encryption mode {0:?}")]
    UnknownMode(String),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed (authentication error)")]
    DecryptionFailed,
    #[error("packet too short: {0} bytes")]
    PacketTooShort(usize),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no valid reply after {attempts} attempts")]
    TimedOut { attempts: u32 },
    #[error("malformed discovery packet: {0}")]
    Malformed(&'static str),
}
