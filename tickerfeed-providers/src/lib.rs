//! tickerfeed-providers
//!
//! Network connectors implementing the source traits from `tickerfeed-core`:
//!
//! - [`FinnhubQuotes`]: equity quotes over Finnhub's REST `/quote` endpoint.
//! - [`FinnhubStream`]: live equity trades over Finnhub's WebSocket feed.
//! - [`CoinGeckoQuotes`]: crypto prices from CoinGecko's `/simple/price`.
//! - [`YahooHistory`]: sparkline series from Yahoo's chart endpoint.
//! - [`GithubIcons`]: ticker logos from a raw GitHub repository, optionally
//!   persisted to a local directory.
//!
//! Every HTTP connector shares a `reqwest::Client` built by [`http::build_client`]
//! from the engine's network settings, and classifies failures into the
//! [`EngineError`](tickerfeed_core::EngineError) taxonomy the credential pool
//! understands.
#![warn(missing_docs)]

/// CoinGecko crypto quotes.
pub mod coingecko;
/// Finnhub REST quotes and WebSocket trades.
pub mod finnhub;
/// Shared HTTP client construction and response classification.
pub mod http;
/// Ticker logo downloads.
pub mod icons;
/// Yahoo chart history.
pub mod yahoo;

pub use coingecko::CoinGeckoQuotes;
pub use finnhub::{FinnhubQuotes, FinnhubStream};
pub use http::build_client;
pub use icons::GithubIcons;
pub use yahoo::YahooHistory;

use rust_decimal::Decimal;

/// Convert a provider float into a positive decimal price.
///
/// Providers report "no data" as zero or omit the field; both map to `None`.
pub(crate) fn positive_price(raw: Option<f64>) -> Option<Decimal> {
    let v = raw.filter(|v| v.is_finite() && *v > 0.0)?;
    Decimal::try_from(v).ok().map(|d| d.normalize())
}
