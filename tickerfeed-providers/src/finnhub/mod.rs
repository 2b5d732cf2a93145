//! Finnhub equity connectors.
//!
//! The REST and WebSocket connectors share one provider key, so both draw on the
//! same configured API keys and their outcomes feed the same cooldowns.
//!
//! API documentation: <https://finnhub.io/docs/api>

mod rest;
mod stream;

pub use rest::FinnhubQuotes;
pub use stream::{FinnhubStream, parse_frame};

use tickerfeed_core::ProviderKey;

/// Provider key used for Finnhub credentials (`"finnhub"` in the settings file).
pub const KEY: ProviderKey = ProviderKey::new("finnhub");

/// Default REST base URL.
pub const REST_URL: &str = "https://finnhub.io/api/v1";

/// Default WebSocket URL.
pub const STREAM_URL: &str = "wss://ws.finnhub.io";
