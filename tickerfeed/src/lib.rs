//! tickerfeed keeps a live quote for every symbol on a watch-list.
//!
//! Overview
//! - Streams quotes over a provider WebSocket where one is available and falls back to
//!   batched REST polling per symbol when the stream drops, goes quiet, or refuses a
//!   symbol. A tick from the stream moves the symbol back.
//! - Rotates API keys through a credential pool with escalating cooldowns on rate
//!   limits and auth failures.
//! - Serves price history and symbol icons from caches that share one in-flight fetch
//!   per key.
//! - Publishes quote, staleness, connector and credential events on a broadcast bus.
//!
//! Key behaviors
//! - Per symbol, ticks are applied in strictly increasing timestamp order; older or
//!   duplicate ticks are dropped and counted.
//! - A slow event subscriber loses its oldest events; producers never block.
//! - Shutdown signals every worker, waits for the configured grace period, then aborts.
//!
//! Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use tickerfeed::{Engine, EngineEvent, JsonFileSource};
//! use tickerfeed_providers::{CoinGeckoQuotes, FinnhubQuotes, FinnhubStream, build_client};
//!
//! let client = build_client(&Default::default())?;
//! let engine = Engine::builder()
//!     .config_source(JsonFileSource::new("settings.json"))
//!     .with_stream_source(Arc::new(FinnhubStream::new()))
//!     .with_quote_source(Arc::new(FinnhubQuotes::new(client.clone())))
//!     .with_quote_source(Arc::new(CoinGeckoQuotes::new(client)))
//!     .build()?;
//! engine.start()?;
//!
//! let mut events = engine.subscribe();
//! while let Some(event) = events.recv().await {
//!     if let EngineEvent::QuoteUpdated(q) = event {
//!         println!("{} {:?}", q.symbol(), q.price);
//!     }
//! }
//! engine.shutdown().await;
//! ```
#![warn(missing_docs)]

/// Event fan-out.
pub mod bus;
/// API key rotation and cooldown.
pub mod credentials;
mod engine;
/// Drop and failure counters.
pub mod metrics;
/// Latest quote per symbol.
pub mod quotes;
/// Connector supervision: the routing state machine and its workers.
#[allow(missing_docs)]
pub mod supervisor;

pub use bus::{EventBus, Subscription};
pub use credentials::{CredentialPool, Outcome, SlotStats};
pub use engine::{Engine, EngineBuilder};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use quotes::QuoteStore;

pub use tickerfeed_cache::{CachedSeries, HistoryLookup, JsonFileSource, StaticSource};
pub use tickerfeed_core::{
    AssetKind, ConnectorState, EngineConfig, EngineError, EngineEvent, HistoryRange,
    HistorySeries, IconImage, Instrument, ProviderKey, Quote, QuoteTick, Staleness, Symbol,
};
