//! Deduplicating TTL cache for price history series.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tickerfeed_core::{
    EngineError, HistoryRange, HistorySeries, HistorySource, Instrument, StopSignal,
};
use tickerfeed_types::HistoryCacheConfig;
use tokio::time::Instant;

use crate::inflight::{InFlight, PendingFetch};

/// Cache key: history for one instrument and range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    /// Instrument the series belongs to.
    pub instrument: Instrument,
    /// Look-back window.
    pub range: HistoryRange,
}

/// Outcome of a non-blocking cache lookup.
#[derive(Debug, Clone)]
pub enum HistoryLookup {
    /// A series within its TTL.
    Fresh(Arc<HistorySeries>),
    /// An expired series, or one whose last refresh failed.
    ///
    /// `refresh` is set when a refetch is running; it is `None` while a failed
    /// refresh waits for its retry time.
    Stale {
        /// Last good series.
        series: Arc<HistorySeries>,
        /// Running refetch, if any.
        refresh: Option<PendingFetch<Arc<HistorySeries>>>,
    },
    /// Nothing cached yet; a fetch is running.
    Pending(PendingFetch<Arc<HistorySeries>>),
    /// A recent fetch failed and nothing is cached; retried after the negative TTL.
    Unavailable(EngineError),
}

/// Result of a blocking fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSeries {
    /// The series.
    pub series: Arc<HistorySeries>,
    /// `true` when the series is past its TTL or its refresh failed.
    pub stale: bool,
}

struct Entry {
    series: Option<Arc<HistorySeries>>,
    checked_at: Instant,
    refresh_failed: bool,
    last_error: Option<EngineError>,
}

struct State {
    entries: LruCache<HistoryKey, Entry>,
    config: HistoryCacheConfig,
}

impl State {
    fn ttl_for(&self, entry: &Entry, range: HistoryRange) -> Duration {
        if entry.series.is_some() {
            self.config.ttl_for(range.label())
        } else {
            self.config.negative_ttl()
        }
    }
}

struct Inner {
    source: Arc<dyn HistorySource>,
    state: Mutex<State>,
    inflight: InFlight<HistoryKey, Arc<HistorySeries>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, key: HistoryKey, result: &Result<Arc<HistorySeries>, EngineError>) {
        let now = Instant::now();
        let mut state = self.lock();
        match result {
            Ok(series) => {
                state.entries.put(
                    key,
                    Entry {
                        series: Some(Arc::clone(series)),
                        checked_at: now,
                        refresh_failed: false,
                        last_error: None,
                    },
                );
            }
            Err(EngineError::ShuttingDown) => {}
            Err(e) => {
                let previous = state.entries.pop(&key).and_then(|e| e.series);
                tracing::warn!(
                    symbol = %key.instrument.symbol(),
                    range = %key.range,
                    has_previous = previous.is_some(),
                    error = %e,
                    "history fetch failed"
                );
                state.entries.put(
                    key,
                    Entry {
                        series: previous,
                        checked_at: now,
                        refresh_failed: true,
                        last_error: Some(e.clone()),
                    },
                );
            }
        }
    }
}

/// History cache with per-key fetch deduplication.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Clone)]
pub struct HistoryCache {
    inner: Arc<Inner>,
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

impl HistoryCache {
    /// Create a cache over `source`.
    #[must_use]
    pub fn new(
        source: Arc<dyn HistorySource>,
        config: HistoryCacheConfig,
        stop: StopSignal,
    ) -> Self {
        let inflight = InFlight::new(config.max_concurrent_fetches, stop);
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(State {
                    entries: LruCache::new(capacity(config.max_entries)),
                    config,
                }),
                inflight,
            }),
        }
    }

    /// Replace TTLs and capacity. Shrinking evicts least recently used series.
    pub fn apply_config(&self, config: HistoryCacheConfig) {
        let mut state = self.inner.lock();
        state.entries.resize(capacity(config.max_entries));
        state.config = config;
    }

    /// Non-blocking lookup; starts a fetch when the entry is missing or expired.
    pub fn get(&self, instrument: &Instrument, range: HistoryRange) -> HistoryLookup {
        let key = HistoryKey {
            instrument: instrument.clone(),
            range,
        };
        let now = Instant::now();

        let previous = {
            let mut state = self.inner.lock();
            let ttl = state.entries.peek(&key).map(|e| state.ttl_for(e, range));
            match (state.entries.get(&key), ttl) {
                (Some(entry), Some(ttl)) if now.duration_since(entry.checked_at) < ttl => {
                    return match (&entry.series, entry.refresh_failed) {
                        (Some(series), false) => HistoryLookup::Fresh(Arc::clone(series)),
                        (Some(series), true) => HistoryLookup::Stale {
                            series: Arc::clone(series),
                            refresh: None,
                        },
                        (None, _) => HistoryLookup::Unavailable(
                            entry
                                .last_error
                                .clone()
                                .unwrap_or_else(|| EngineError::not_found(format!("history for {key:?}"))),
                        ),
                    };
                }
                (Some(entry), _) => entry.series.clone(),
                (None, _) => None,
            }
        };

        let fetch = self.start_fetch(key);
        match previous {
            Some(series) => HistoryLookup::Stale {
                series,
                refresh: Some(fetch),
            },
            None => HistoryLookup::Pending(fetch),
        }
    }

    /// Wait for a series, fetching it if needed.
    ///
    /// An expired series whose refetch fails is returned flagged stale.
    ///
    /// # Errors
    /// Returns the fetch error when nothing is cached, or `ShuttingDown`.
    pub async fn fetch(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<CachedSeries, EngineError> {
        match self.get(instrument, range) {
            HistoryLookup::Fresh(series) => Ok(CachedSeries {
                series,
                stale: false,
            }),
            HistoryLookup::Stale {
                series,
                refresh: None,
            } => Ok(CachedSeries {
                series,
                stale: true,
            }),
            HistoryLookup::Stale {
                series,
                refresh: Some(refresh),
            } => match refresh.await {
                Ok(series) => Ok(CachedSeries {
                    series,
                    stale: false,
                }),
                Err(EngineError::ShuttingDown) => Err(EngineError::ShuttingDown),
                Err(_) => Ok(CachedSeries {
                    series,
                    stale: true,
                }),
            },
            HistoryLookup::Pending(fetch) => fetch.await.map(|series| CachedSeries {
                series,
                stale: false,
            }),
            HistoryLookup::Unavailable(e) => Err(e),
        }
    }

    /// Drop series whose last fetch attempt is older than the retention window.
    ///
    /// Returns the number of dropped entries.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut state = self.inner.lock();
        let retention = state.config.retention();
        let expired: Vec<HistoryKey> = state
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.checked_at) >= retention)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            state.entries.pop(k);
        }
        if !expired.is_empty() {
            tracing::debug!(dropped = expired.len(), "purged expired history series");
        }
        expired.len()
    }

    /// Number of cached series, including negative entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch for the key is running.
    #[must_use]
    pub fn is_fetching(&self, instrument: &Instrument, range: HistoryRange) -> bool {
        self.inner.inflight.is_pending(&HistoryKey {
            instrument: instrument.clone(),
            range,
        })
    }

    fn start_fetch(&self, key: HistoryKey) -> PendingFetch<Arc<HistorySeries>> {
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let (fetch, started) = self.inner.inflight.join_or_start(key.clone(), async move {
            let result = inner
                .source
                .fetch_history(&task_key.instrument, task_key.range)
                .await
                .map(Arc::new);
            inner.record(task_key, &result);
            result
        });
        if started {
            tracing::debug!(
                symbol = %key.instrument.symbol(),
                range = %key.range,
                "history cache miss; fetching"
            );
        }
        fetch
    }
}
