//! Generic WebSocket session engine.
//!
//! A [`Connection`] owns one logical session: it opens a socket, runs the
//! [`Protocol`]'s handshake alongside a receive loop, keeps a heartbeat going
//! for its whole lifetime, and reconnects with a randomized backoff until
//! [`ConnectionHandle::stop`] is called or the protocol asks to stop.

mod config;
mod connection;
mod error;
mod protocol;
mod state;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionHandle};
pub use error::ConnectionError;
pub use protocol::{CloseAction, Protocol};
pub use state::ConnectionState;

pub use tokio_tungstenite::tungstenite::Message;

/// Close code sent for a graceful shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the socket dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code the client sends when it drops a socket it intends to resume.
/// Codes 1000 and 1001 would invalidate the session server-side.
pub const CLOSE_RECONNECT: u16 = 4000;
/// Close code reported when the peer closed without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;
