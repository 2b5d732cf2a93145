//! Caches shared by the tickerfeed engine.
//!
//! - [`HistoryCache`]: TTL cache of price series with per-key fetch deduplication.
//! - [`IconCache`]: bounded LRU of symbol icons that never evicts icons still in use.
//! - [`ConfigCache`]: memoised configuration snapshot.
//!
//! History and icon fetches share the [`InFlight`] registry, which guarantees at
//! most one outstanding fetch per key and resolves pending fetches to
//! `ShuttingDown` once the engine's stop signal fires.
#![warn(missing_docs)]

mod config;
mod history;
mod icon;
mod inflight;

pub use config::{ConfigCache, ConfigSource, JsonFileSource, StaticSource};
pub use history::{CachedSeries, HistoryCache, HistoryKey, HistoryLookup};
pub use icon::IconCache;
pub use inflight::{InFlight, PendingFetch};
