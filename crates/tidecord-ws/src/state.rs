use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tidecord_util::EventFlag;
use tokio::sync::watch;

/// Flags shared between the receive loop, the handshake task and the
/// heartbeat task. The tasks never call into each other; they only observe
/// and flip these.
#[derive(Debug)]
pub struct ConnectionState {
    /// Terminal: once set the connection never reconnects.
    pub stop_requested: EventFlag,
    /// Cleared before each heartbeat is sent, set when the peer acknowledges it.
    pub heartbeat_ack: EventFlag,
    /// Set by the protocol once the server announced its heartbeat interval on
    /// the current socket; cleared whenever that socket goes away.
    pub heartbeat_ready: EventFlag,
    /// Set once the handshake completed on the current socket.
    pub ready_to_run: EventFlag,
    heartbeat_interval_ms: AtomicU64,
    /// Bumped every time a socket goes away, so a value read while a socket
    /// is live names that socket.
    generation: watch::Sender<u64>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            stop_requested: EventFlag::new(),
            heartbeat_ack: EventFlag::new(),
            heartbeat_ready: EventFlag::new(),
            ready_to_run: EventFlag::new(),
            heartbeat_interval_ms: AtomicU64::new(0),
            generation: watch::channel(0).0,
        }
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_heartbeat_interval(&self, interval: Duration) {
        self.heartbeat_interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.heartbeat_interval_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Record the server's interval and release the heartbeat task.
    pub fn start_heartbeat(&self, interval: Duration) {
        self.set_heartbeat_interval(interval);
        self.heartbeat_ready.set();
    }

    /// Identifies the current socket; changes once that socket is gone.
    pub fn socket_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Resolves once the socket named by `generation` has gone away.
    pub async fn socket_gone(&self, generation: u64) {
        let mut rx = self.generation.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|current| *current != generation).await;
    }

    /// Reset the per-socket flags after a disconnect and retire the socket's
    /// generation.
    pub(crate) fn end_socket(&self) {
        self.ready_to_run.clear();
        self.heartbeat_ready.clear();
        self.heartbeat_ack.clear();
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ending_a_socket_retires_its_generation() {
        let state = ConnectionState::new();
        state.start_heartbeat(Duration::from_millis(100));
        let first = state.socket_generation();

        assert!(
            tokio::time::timeout(Duration::from_millis(20), state.socket_gone(first))
                .await
                .is_err()
        );
        state.end_socket();
        assert!(!state.heartbeat_ready.is_set());
        assert_ne!(state.socket_generation(), first);
        tokio::time::timeout(Duration::from_secs(1), state.socket_gone(first))
            .await
            .unwrap();
    }
}
