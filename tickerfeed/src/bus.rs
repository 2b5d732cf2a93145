//! Fan-out of engine events to any number of consumers.

use std::sync::Arc;

use tickerfeed_core::EngineEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::metrics::EngineMetrics;

/// Broadcast channel of [`EngineEvent`]s.
///
/// Publishing never blocks. Each subscriber sees at most `capacity` unread events;
/// older ones are overwritten and counted as dropped when the subscriber catches up.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    metrics: Arc<EngineMetrics>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber capacity.
    #[must_use]
    pub fn new(capacity: usize, metrics: Arc<EngineMetrics>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, metrics }
    }

    /// Publish an event; a bus without subscribers discards it.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish several events in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = EngineEvent>) {
        for e in events {
            self.publish(e);
        }
    }

    /// Start receiving events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of the [`EventBus`].
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<EngineEvent>,
    metrics: Arc<EngineMetrics>,
}

impl Subscription {
    /// Next event, skipping over anything lost to lag. `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.lagged(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.lagged(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn lagged(&self, n: u64) {
        tracing::warn!(dropped = n, "event subscriber lagged; oldest events dropped");
        self.metrics.add_dropped_events(n);
    }
}
