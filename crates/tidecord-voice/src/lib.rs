//! Voice connections: the voice gateway handshake, UDP IP discovery,
//! RTP packetization with secretbox encryption, and a paced audio player.

pub mod crypto;
pub mod discovery;
mod error;
pub mod ogg;
pub mod packet;
pub mod player;
mod registry;
mod session;
pub mod source;

pub use crypto::{EncryptionContext, EncryptionMode};
pub use error::{CryptoError, DiscoveryError, VoiceError};
pub use player::{AfterFinish, AudioPlayer, PlayerState, Track};
pub use registry::VoiceRegistry;
pub use session::{
    VoiceConfig, VoiceSession, VoiceSessionInfo, CLOSE_AUTHENTICATION_FAILED, CLOSE_DISCONNECTED,
    CLOSE_SESSION_INVALID,
};
pub use source::{AudioSource, FfmpegSource, MemorySource, OggOpusSource};
