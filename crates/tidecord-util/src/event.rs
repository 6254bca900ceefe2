//! Waitable boolean flag shared between tasks and OS threads.
//!
//! Async waiters subscribe to a `watch` channel so the wait composes with
//! `tokio::select!` alongside socket readiness; blocking waiters (the audio
//! pacing thread) park on a condition variable. Both views are updated under
//! the same lock, so they never disagree.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

pub struct EventFlag {
    state: Mutex<bool>,
    cond: Condvar,
    watch: watch::Sender<bool>,
}

impl EventFlag {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(false);
        Self {
            state: Mutex::new(false),
            cond: Condvar::new(),
            watch,
        }
    }

    pub fn set(&self) {
        let mut state = self.state.lock();
        if !*state {
            *state = true;
            self.watch.send_replace(true);
            self.cond.notify_all();
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        if *state {
            *state = false;
            self.watch.send_replace(false);
        }
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Wait until the flag is set.
    pub async fn wait(&self) {
        let mut rx = self.watch.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Wait until the flag is set or `timeout` elapses. Returns whether the
    /// flag was observed set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Like [`wait_timeout`](Self::wait_timeout) but against an absolute deadline.
    pub async fn wait_until(&self, deadline: tokio::time::Instant) -> bool {
        tokio::time::timeout_at(deadline, self.wait()).await.is_ok()
    }

    /// Blocking wait for use from plain OS threads.
    pub fn wait_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !*state {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return *state;
            }
        }
        true
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFlag")
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_and_clear_are_idempotent() {
        let flag = EventFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
        flag.clear();
        flag.clear();
        assert!(!flag.is_set());
    }

    #[tokio::test]
    async fn async_wait_wakes_on_set() {
        let flag = Arc::new(EventFlag::new());
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait_timeout(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.set();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn async_wait_times_out_when_never_set() {
        let flag = EventFlag::new();
        assert!(!flag.wait_timeout(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let flag = EventFlag::new();
        flag.set();
        assert!(flag.wait_timeout(Duration::from_millis(1)).await);
    }

    #[test]
    fn blocking_wait_sees_set_from_other_thread() {
        let flag = Arc::new(EventFlag::new());
        let setter = {
            let flag = flag.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                flag.set();
            })
        };
        assert!(flag.wait_blocking(Duration::from_secs(5)));
        setter.join().unwrap();
        assert!(!EventFlag::new().wait_blocking(Duration::from_millis(10)));
    }
}
