//! Latest quote per watched symbol.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use rust_decimal::Decimal;
use tickerfeed_core::{
    AssetKind, EngineConfig, EngineEvent, Instrument, Quote, QuoteTick, Staleness, Symbol,
    percent_change,
};
use tokio::time::Instant;

use crate::bus::EventBus;
use crate::metrics::EngineMetrics;

struct Entry {
    quote: Quote,
    /// Previous close for which a significant move was already announced.
    announced_close: Option<Decimal>,
}

struct StoreState {
    quotes: HashMap<Symbol, Entry>,
    stale_after: Duration,
    move_threshold: Option<Decimal>,
    group_crypto_first: bool,
}

impl StoreState {
    fn configure(&mut self, config: &EngineConfig) {
        self.stale_after = config.staleness.stale_after();
        self.move_threshold = config
            .display
            .significant_move_percent
            .and_then(Decimal::from_f64_retain)
            .map(|d| d.abs());
        self.group_crypto_first = config.display.group_crypto_first;
    }
}

/// Authoritative latest quote for every watched symbol.
///
/// Updates for one symbol are applied in strictly increasing source timestamp order;
/// anything older or equal is dropped without an event.
pub struct QuoteStore {
    state: RwLock<StoreState>,
    bus: EventBus,
    metrics: Arc<EngineMetrics>,
}

impl QuoteStore {
    /// Empty store publishing on `bus`.
    pub fn new(config: &EngineConfig, bus: EventBus, metrics: Arc<EngineMetrics>) -> Self {
        let mut state = StoreState {
            quotes: HashMap::new(),
            stale_after: Duration::ZERO,
            move_threshold: None,
            group_crypto_first: false,
        };
        state.configure(config);
        Self {
            state: RwLock::new(state),
            bus,
            metrics,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick up staleness and display settings.
    pub fn apply_config(&self, config: &EngineConfig) {
        self.write().configure(config);
    }

    /// Start tracking `instrument`. Returns `true` if it was not watched before.
    pub fn watch(&self, instrument: Instrument) -> bool {
        let mut state = self.write();
        match state.quotes.get_mut(instrument.symbol()) {
            Some(entry) => {
                entry.quote.instrument = instrument;
                false
            }
            None => {
                state.quotes.insert(
                    instrument.symbol().clone(),
                    Entry {
                        quote: Quote::pending(instrument),
                        announced_close: None,
                    },
                );
                true
            }
        }
    }

    /// Stop tracking every symbol not in `keep`. Returns the removed symbols.
    pub fn retain(&self, keep: &HashSet<Symbol>) -> Vec<Symbol> {
        let mut state = self.write();
        let removed: Vec<Symbol> = state
            .quotes
            .keys()
            .filter(|s| !keep.contains(*s))
            .cloned()
            .collect();
        for s in &removed {
            state.quotes.remove(s);
        }
        removed
    }

    /// Apply a tick. Returns `true` if the stored quote changed.
    pub fn update(&self, tick: QuoteTick) -> bool {
        let Some(price) = tick.price else {
            tracing::trace!(symbol = %tick.symbol, "tick without price ignored");
            return false;
        };
        let now = Instant::now();

        let mut events = Vec::with_capacity(3);
        {
            let mut state = self.write();
            let threshold = state.move_threshold;
            let Some(entry) = state.quotes.get_mut(&tick.symbol) else {
                tracing::trace!(symbol = %tick.symbol, "tick for unwatched symbol ignored");
                return false;
            };
            if entry.quote.source_ts.is_some_and(|stored| tick.ts <= stored) {
                self.metrics.inc_rejected_updates();
                tracing::trace!(
                    symbol = %tick.symbol,
                    ts = %tick.ts,
                    "out-of-order tick ignored"
                );
                return false;
            }

            let q = &mut entry.quote;
            q.previous_price = q.price;
            q.price = Some(price);
            if let Some(close) = tick.previous_close {
                q.previous_close = Some(close);
            }
            q.change_percent = q
                .previous_close
                .or(q.previous_price)
                .and_then(|base| percent_change(base, price));
            q.source_ts = Some(tick.ts);
            q.updated_at = Some(now);
            let from = std::mem::replace(&mut q.staleness, Staleness::Fresh);

            events.push(EngineEvent::QuoteUpdated(q.clone()));
            if from != Staleness::Fresh {
                events.push(EngineEvent::StalenessChanged {
                    symbol: tick.symbol.clone(),
                    from,
                    to: Staleness::Fresh,
                });
            }

            if let (Some(threshold), Some(close)) = (threshold, q.previous_close)
                && entry.announced_close != Some(close)
                && let Some(change) = percent_change(close, price)
                && change.abs() >= threshold
            {
                entry.announced_close = Some(close);
                events.push(EngineEvent::SignificantMove {
                    symbol: tick.symbol.clone(),
                    price,
                    previous_close: close,
                    change_percent: change,
                });
            }
            // Published under the lock so events for one symbol leave in apply order.
            self.bus.publish_all(events);
        }
        true
    }

    /// Mark quotes not refreshed within the staleness window as stale.
    ///
    /// Returns how many symbols flipped.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.write();
        let stale_after = state.stale_after;
        let mut flipped = 0;
        for entry in state.quotes.values_mut() {
            let q = &mut entry.quote;
            if q.staleness != Staleness::Fresh
                || !q
                    .updated_at
                    .is_some_and(|at| now.saturating_duration_since(at) > stale_after)
            {
                continue;
            }
            q.staleness = Staleness::Stale;
            flipped += 1;
            tracing::debug!(symbol = %q.symbol(), "quote went stale");
            self.bus.publish(EngineEvent::StalenessChanged {
                symbol: q.symbol().clone(),
                from: Staleness::Fresh,
                to: Staleness::Stale,
            });
        }
        flipped
    }

    /// Latest quote for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Quote> {
        self.read().quotes.get(symbol).map(|e| e.quote.clone())
    }

    /// Whether `symbol` is watched.
    #[must_use]
    pub fn is_watched(&self, symbol: &Symbol) -> bool {
        self.read().quotes.contains_key(symbol)
    }

    /// Ordered copy of every quote: alphabetical, or crypto first when configured.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Quote> {
        let state = self.read();
        let mut out: Vec<Quote> = state.quotes.values().map(|e| e.quote.clone()).collect();
        if state.group_crypto_first {
            out.sort_by(|a, b| {
                let rank = |q: &Quote| u8::from(q.instrument.kind() != AssetKind::Crypto);
                rank(a)
                    .cmp(&rank(b))
                    .then_with(|| a.symbol().cmp(b.symbol()))
            });
        } else {
            out.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        }
        out
    }

    /// Number of watched symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().quotes.len()
    }

    /// Whether nothing is watched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for QuoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteStore")
            .field("symbols", &self.len())
            .finish_non_exhaustive()
    }
}
