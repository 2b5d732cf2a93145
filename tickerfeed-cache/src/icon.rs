//! Bounded LRU cache of symbol icons.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tickerfeed_core::{EngineError, IconImage, IconSource, StopSignal, Symbol};
use tickerfeed_types::IconCacheConfig;

use crate::inflight::InFlight;

struct State {
    entries: LruCache<Symbol, Arc<IconImage>>,
    bytes: u64,
    max_entries: usize,
    max_bytes: Option<u64>,
}

impl State {
    fn over_budget(&self) -> bool {
        self.entries.len() > self.max_entries
            || self.max_bytes.is_some_and(|max| self.bytes > max)
    }

    /// Least recently used entry that nobody outside the cache holds, other than `keep`.
    fn eviction_candidate(&self, keep: Option<&Symbol>) -> Option<Symbol> {
        self.entries
            .iter()
            .rev()
            .find(|(k, v)| Some(*k) != keep && Arc::strong_count(v) == 1)
            .map(|(k, _)| k.clone())
    }

    fn remove(&mut self, symbol: &Symbol) -> Option<Arc<IconImage>> {
        let image = self.entries.pop(symbol)?;
        self.bytes = self.bytes.saturating_sub(image.byte_len() as u64);
        Some(image)
    }

    /// Evict until within budget. Returns `false` if pinned entries prevent it.
    fn evict(&mut self, keep: Option<&Symbol>) -> bool {
        while self.over_budget() {
            let Some(victim) = self.eviction_candidate(keep) else {
                return false;
            };
            self.remove(&victim);
            tracing::trace!(symbol = %victim, "evicted icon");
        }
        true
    }

    fn insert(&mut self, image: &Arc<IconImage>) {
        let symbol = image.symbol.clone();
        self.remove(&symbol);
        self.bytes += image.byte_len() as u64;
        self.entries.put(symbol.clone(), Arc::clone(image));
        if !self.evict(Some(&symbol)) {
            // Every other entry is in use; hand the image out without keeping it.
            self.remove(&symbol);
            tracing::debug!(symbol = %symbol, "icon cache full of pinned entries; not retaining");
        }
    }
}

struct Inner {
    source: Arc<dyn IconSource>,
    state: Mutex<State>,
    inflight: InFlight<Symbol, Arc<IconImage>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Icon cache bounded by entry count and an optional byte budget.
///
/// Handles returned by [`IconCache::get_or_fetch`] pin their entry: an icon that is
/// still referenced outside the cache is never evicted.
#[derive(Clone)]
pub struct IconCache {
    inner: Arc<Inner>,
}

impl IconCache {
    /// Create a cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn IconSource>, config: &IconCacheConfig, stop: StopSignal) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(State {
                    entries: LruCache::unbounded(),
                    bytes: 0,
                    max_entries: config.max_entries.max(1),
                    max_bytes: config.max_bytes,
                }),
                inflight: InFlight::new(config.max_concurrent_fetches, stop),
            }),
        }
    }

    /// Apply new bounds, evicting unpinned entries as needed.
    pub fn apply_config(&self, config: &IconCacheConfig) {
        let mut state = self.inner.lock();
        state.max_entries = config.max_entries.max(1);
        state.max_bytes = config.max_bytes;
        state.evict(None);
    }

    /// Cached icon without fetching; promotes on hit.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Arc<IconImage>> {
        self.inner.lock().entries.get(symbol).cloned()
    }

    /// Cached icon or a deduplicated fetch. Missing icons are cached as placeholders.
    ///
    /// # Errors
    /// Network failures are returned and not cached.
    pub async fn get_or_fetch(&self, symbol: &Symbol) -> Result<Arc<IconImage>, EngineError> {
        if let Some(hit) = self.get(symbol) {
            return Ok(hit);
        }
        let inner = Arc::clone(&self.inner);
        let task_symbol = symbol.clone();
        let (fetch, started) = self.inner.inflight.join_or_start(symbol.clone(), async move {
            let image = match inner.source.fetch_icon(&task_symbol).await? {
                Some(bytes) => IconImage::new(task_symbol, bytes),
                None => {
                    tracing::debug!(symbol = %task_symbol, "no icon available; caching placeholder");
                    IconImage::placeholder(task_symbol)
                }
            };
            let image = Arc::new(image);
            inner.lock().insert(&image);
            Ok(image)
        });
        if started {
            tracing::debug!(symbol = %symbol, "icon cache miss; fetching");
        }
        fetch.await
    }

    /// Number of cached icons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by cached icons.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.inner.lock().bytes
    }

    /// Whether `symbol` is cached, without promoting it.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.inner.lock().entries.contains(symbol)
    }
}
