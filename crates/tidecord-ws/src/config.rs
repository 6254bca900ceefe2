use std::time::Duration;

use tidecord_util::Backoff;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound for opening the socket (TCP + TLS + upgrade).
    pub connect_timeout: Duration,
    /// Upper bound for the protocol handshake; expiry forces a reconnect.
    pub handshake_timeout: Duration,
    /// Longest a single receive wait may block before the stop flag is re-checked.
    pub recv_poll: Duration,
    /// How long to let queued frames (including the close frame) flush on disconnect.
    pub close_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            recv_poll: Duration::from_secs(1),
            close_timeout: Duration::from_secs(2),
            backoff: Backoff::default(),
        }
    }
}
