use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cloneable receiving side of a stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Create a connected sender and signal.
    #[must_use]
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// Whether stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once stop is requested or the sender is gone. Cancel-safe.
    pub async fn stopped(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

/// Owned handle to a spawned background worker.
///
/// Dropping the handle signals stop and aborts the task if it is still running.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    inner: Option<JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl WorkerHandle {
    /// Wrap a task together with the sender of its stop signal.
    #[must_use]
    pub fn new(name: &'static str, inner: JoinHandle<()>, stop_tx: watch::Sender<bool>) -> Self {
        Self {
            name,
            inner: Some(inner),
            stop_tx: Some(stop_tx),
        }
    }

    /// Worker name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Request a graceful stop and wait up to `grace` for the task to end, then abort it.
    ///
    /// Returns `true` when the task ended on its own.
    pub async fn stop(mut self, grace: Duration) -> bool {
        self.signal();
        let Some(mut handle) = self.inner.take() else {
            return true;
        };
        if tokio::time::timeout(grace, &mut handle).await.is_ok() {
            true
        } else {
            tracing::warn!(worker = self.name, "worker did not stop within grace period; aborting");
            handle.abort();
            false
        }
    }

    /// Request a graceful stop without waiting for the task.
    pub fn signal(&self) {
        if let Some(tx) = self.stop_tx.as_ref() {
            let _ = tx.send(true);
        }
    }

    /// Whether the task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Abort the task immediately.
    pub fn abort(mut self) {
        if let Some(h) = self.inner.take() {
            h.abort();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.inner.take()
            && !task.is_finished()
        {
            task.abort();
        }
    }
}
