//! Deterministic, scriptable sources for exercising the tickerfeed engine without a network.
//!
//! Every mock comes with a controller handle. Tests keep the controller, hand the
//! source to the engine, and then script failures, latency and pushed ticks from
//! the outside while inspecting the recorded request log.

mod history;
mod icon;
mod quote;
mod stream;

use tickerfeed_core::EngineError;

pub use history::{HistoryController, MockHistorySource};
pub use icon::{IconController, MockIconSource};
pub use quote::{MockQuoteSource, QuoteCall, QuoteController};
pub use stream::{MockStreamSource, StreamController, StreamEvent};

/// Instruction for how a method should behave for a given input.
#[derive(Debug, Clone)]
pub enum MockBehavior<T> {
    /// Return the provided value immediately.
    Return(T),
    /// Fail immediately with the provided error.
    Fail(EngineError),
    /// Hang indefinitely (simulate a timeout).
    Hang,
}

/// Timestamp used by mocks: a fixed base plus `seq` seconds so successive ticks
/// for a symbol are strictly increasing.
#[must_use]
pub fn mock_ts(seq: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(1_700_000_000 + seq, 0).unwrap_or_default()
}
