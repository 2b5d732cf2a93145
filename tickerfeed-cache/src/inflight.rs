//! At most one outstanding fetch per key.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tickerfeed_core::{EngineError, StopSignal};
use tokio::sync::Semaphore;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, EngineError>>>;

/// A fetch that may be awaited by any number of requesters.
///
/// Every clone resolves to the same result. Dropping all clones does not cancel the
/// fetch; it keeps running in the background and populates its cache.
#[derive(Clone)]
pub struct PendingFetch<V: Clone>(SharedFetch<V>);

impl<V: Clone> std::fmt::Debug for PendingFetch<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingFetch(..)")
    }
}

impl<V: Clone> Future for PendingFetch<V> {
    type Output = Result<V, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

struct Slot<V: Clone> {
    id: u64,
    fetch: SharedFetch<V>,
}

struct Inner<K, V: Clone> {
    pending: Mutex<HashMap<K, Slot<V>>>,
    permits: Arc<Semaphore>,
    stop: StopSignal,
    next_id: AtomicU64,
}

impl<K: Hash + Eq, V: Clone> Inner<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, key: &K, id: u64) {
        let mut pending = self.lock();
        if pending.get(key).is_some_and(|s| s.id == id) {
            pending.remove(key);
        }
    }
}

/// Registry of outstanding fetches keyed by `K`.
///
/// Fetches run on spawned tasks bounded by a shared semaphore. When the stop signal
/// fires, fetches that have not completed resolve to [`EngineError::ShuttingDown`].
pub struct InFlight<K, V: Clone> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V: Clone> Clone for InFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> InFlight<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a registry running at most `max_concurrent` fetches at a time.
    #[must_use]
    pub fn new(max_concurrent: usize, stop: StopSignal) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                stop,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Whether a fetch for `key` is outstanding.
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Number of outstanding fetches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the outstanding fetch for `key`, or start `fetch` if there is none.
    ///
    /// `fetch` is only polled when this call starts a new fetch; otherwise it is
    /// dropped unpolled. Returns the shared handle and whether a fetch was started.
    pub fn join_or_start<F>(&self, key: K, fetch: F) -> (PendingFetch<V>, bool)
    where
        F: Future<Output = Result<V, EngineError>> + Send + 'static,
    {
        let mut pending = self.inner.lock();
        if let Some(slot) = pending.get(&key) {
            return (PendingFetch(slot.fetch.clone()), false);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let mut stop = inner.stop.clone();
            let permits = Arc::clone(&inner.permits);
            let result = tokio::select! {
                biased;
                () = stop.stopped() => Err(EngineError::ShuttingDown),
                r = async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| EngineError::ShuttingDown)?;
                    fetch.await
                } => r,
            };
            inner.finish(&task_key, id);
            result
        });

        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(EngineError::ShuttingDown),
                Err(e) => Err(EngineError::transient("cache", format!("fetch task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        pending.insert(
            key,
            Slot {
                id,
                fetch: shared.clone(),
            },
        );
        (PendingFetch(shared), true)
    }
}
