use tokio::sync::mpsc;

use crate::{Client, Event};

/// Receives every dispatch event after the cache has been updated.
///
/// Called on the gateway's receive task, one event at a time and in server
/// order. Long-running work should be spawned rather than done inline, since
/// the next event is not processed until this returns.
pub trait EventHandler: Send + Sync + 'static {
    fn on_event(&self, client: &Client, event: Event);
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _client: &Client, _event: Event) {}
}

/// Adapts a closure into an [`EventHandler`].
pub struct FnHandler<F>(pub F);

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Client, Event) + Send + Sync + 'static,
{
    fn on_event(&self, client: &Client, event: Event) {
        (self.0)(client, event)
    }
}

/// Pushes events onto an unbounded queue for pull-style consumption.
#[derive(Debug, Clone)]
pub struct QueueHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl QueueHandler {
    pub fn new() -> (Self, EventQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventQueue { rx })
    }
}

impl EventHandler for QueueHandler {
    fn on_event(&self, _client: &Client, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event queue dropped, discarding event");
        }
    }
}

/// Consumer side of a [`QueueHandler`]. Events come out in dispatch order.
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventQueue {
    /// Next event, or `None` once the client has been dropped.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Blocking variant for plain threads. Must not be called from async code.
    pub fn next_event_blocking(&mut self) -> Option<Event> {
        self.rx.blocking_recv()
    }

    pub fn try_next_event(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}
