use std::future::Future;

use serde::de::DeserializeOwned;

use crate::{ConnectionError, ConnectionHandle};

/// What the engine should do after a socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    Reconnect,
    Stop,
}

/// The strategy a [`Connection`](crate::Connection) is parameterized with.
///
/// The engine owns sockets, tasks and retries; the protocol decides what a
/// handshake is, how frames are interpreted and what a heartbeat looks like.
pub trait Protocol: Send + Sync + 'static {
    /// Decoded form of one inbound text frame.
    type Frame: DeserializeOwned + Send + 'static;

    /// Logical name used in logs.
    fn name(&self) -> &str;

    /// Target URL, consulted again before every connect attempt.
    fn url(&self) -> String;

    /// Runs once per successful socket connect, concurrently with the
    /// receive loop. Returning an error (or exceeding the configured
    /// handshake timeout) forces a reconnect.
    fn handshake(
        &self,
        conn: ConnectionHandle,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Handle one inbound frame. Frames are dispatched in arrival order, one
    /// at a time; errors are logged and do not end the receive loop.
    fn dispatch(
        &self,
        frame: Self::Frame,
        conn: &ConnectionHandle,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Full heartbeat frame to send.
    fn heartbeat_payload(&self) -> Result<serde_json::Value, ConnectionError>;

    /// Decide whether a close code allows reconnecting.
    fn on_close(&self, _code: u16) -> CloseAction {
        CloseAction::Reconnect
    }

    /// Reset per-socket protocol state after a disconnect.
    fn cleanup(&self) {}
}
