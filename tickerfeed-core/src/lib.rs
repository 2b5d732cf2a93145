//! tickerfeed-core
//!
//! Core types, traits, and utilities shared across the tickerfeed workspace.
//!
//! - `types`: symbols, instruments, ticks, quotes and connector states.
//! - `history`: price series and ranges.
//! - `connector`: the source traits implemented by provider crates.
//! - `calendar`: trading-hours predicate used by the polling worker.
//! - `events`: notifications published on the engine's event bus.
//!
//! Async runtime (Tokio)
//! ---------------------
//! Workers, stop signals and monotonic timestamps are Tokio types
//! (`tokio::task::JoinHandle`, `tokio::sync::watch`, `tokio::time::Instant`), so
//! everything here assumes a Tokio 1.x runtime. Using Tokio's clock lets tests
//! drive time with `start_paused`.
#![warn(missing_docs)]

/// Trading calendar predicate and default implementations.
pub mod calendar;
/// Source traits implemented by provider crates.
pub mod connector;
mod credential;
mod error;
/// Engine event types.
pub mod events;
/// Price history series.
pub mod history;
/// Worker handles and stop signals.
pub mod stream;
pub mod types;

pub use calendar::{AlwaysOpen, SharedCalendar, TradingCalendar, UsEquityCalendar};
pub use connector::{
    HistorySource, IconSource, QuoteBatch, QuoteSource, StreamMessage, StreamSession,
    StreamSource,
};
pub use credential::{Credential, SlotId};
pub use error::{EngineError, FailureKind};
pub use events::EngineEvent;
pub use history::{HistoryPoint, HistoryRange, HistorySeries, percent_change};
pub use stream::{StopSignal, WorkerHandle};
pub use types::*;

pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;
pub use tickerfeed_types::{ConfigError, EngineConfig};
