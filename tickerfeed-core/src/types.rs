//! Domain types shared by the engine, the caches and the providers.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::time::Instant;

pub use tickerfeed_types::{AssetKind, ProviderKey};
use tickerfeed_types::WatchedSymbol;

use crate::EngineError;

/// Case-normalised ticker symbol.
///
/// Construction trims surrounding whitespace and upper-cases ASCII letters, so
/// `" aapl"` and `"AAPL"` are the same key. Cloning is a reference-count bump.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Normalise and validate a raw ticker.
    ///
    /// # Errors
    /// Returns `InvalidArg` when the ticker is empty or contains whitespace.
    pub fn new(raw: &str) -> Result<Self, EngineError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidArg("symbol cannot be empty".into()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(EngineError::InvalidArg(format!(
                "symbol '{trimmed}' contains whitespace"
            )));
        }
        Ok(Self(Arc::from(trimmed.to_ascii_uppercase())))
    }

    /// The normalised ticker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Symbol {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// A symbol tagged with its asset kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instrument {
    symbol: Symbol,
    kind: AssetKind,
}

impl Instrument {
    /// Build an instrument from a raw ticker.
    ///
    /// # Errors
    /// Propagates symbol validation errors.
    pub fn new(raw: &str, kind: AssetKind) -> Result<Self, EngineError> {
        Ok(Self {
            symbol: Symbol::new(raw)?,
            kind,
        })
    }

    /// Build an equity instrument.
    ///
    /// # Errors
    /// Propagates symbol validation errors.
    pub fn equity(raw: &str) -> Result<Self, EngineError> {
        Self::new(raw, AssetKind::Equity)
    }

    /// Build a crypto instrument.
    ///
    /// # Errors
    /// Propagates symbol validation errors.
    pub fn crypto(raw: &str) -> Result<Self, EngineError> {
        Self::new(raw, AssetKind::Crypto)
    }

    /// Build from an already normalised symbol.
    #[must_use]
    pub const fn from_symbol(symbol: Symbol, kind: AssetKind) -> Self {
        Self { symbol, kind }
    }

    /// The normalised symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// The asset kind.
    #[must_use]
    pub const fn kind(&self) -> AssetKind {
        self.kind
    }
}

impl TryFrom<&WatchedSymbol> for Instrument {
    type Error = EngineError;

    fn try_from(w: &WatchedSymbol) -> Result<Self, Self::Error> {
        Self::new(&w.symbol, w.kind)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.kind)
    }
}

/// One price observation from a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteTick {
    /// Symbol the price belongs to.
    pub symbol: Symbol,
    /// Traded or quoted price; `None` when the provider answered without one.
    pub price: Option<Decimal>,
    /// Previous session close when the provider reports it.
    pub previous_close: Option<Decimal>,
    /// Provider timestamp of the observation.
    pub ts: DateTime<Utc>,
}

impl QuoteTick {
    /// Convenience constructor for a tick with a price and no reference close.
    #[must_use]
    pub const fn new(symbol: Symbol, price: Decimal, ts: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price: Some(price),
            previous_close: None,
            ts,
        }
    }

    /// Attach a previous close.
    #[must_use]
    pub const fn with_previous_close(mut self, close: Decimal) -> Self {
        self.previous_close = Some(close);
        self
    }
}

/// Freshness of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Staleness {
    /// No successful update yet.
    #[default]
    Unknown,
    /// Updated within the staleness threshold.
    Fresh,
    /// Last good values are older than the threshold.
    Stale,
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
        })
    }
}

/// Current view of one watched symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// Symbol and kind.
    pub instrument: Instrument,
    /// Last applied price.
    pub price: Option<Decimal>,
    /// Price before the last applied update.
    pub previous_price: Option<Decimal>,
    /// Reference close reported by the provider.
    pub previous_close: Option<Decimal>,
    /// Percent change of `price` against the reference.
    pub change_percent: Option<Decimal>,
    /// Provider timestamp of the last applied update.
    pub source_ts: Option<DateTime<Utc>>,
    /// Local monotonic time of the last applied update.
    pub updated_at: Option<Instant>,
    /// Freshness.
    pub staleness: Staleness,
}

impl Quote {
    /// An empty quote for a symbol that just joined the watch-list.
    #[must_use]
    pub const fn pending(instrument: Instrument) -> Self {
        Self {
            instrument,
            price: None,
            previous_price: None,
            previous_close: None,
            change_percent: None,
            source_ts: None,
            updated_at: None,
            staleness: Staleness::Unknown,
        }
    }

    /// The quote's symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        self.instrument.symbol()
    }
}

/// Lifecycle of a streaming provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectorState {
    /// No session; either idle or between reconnect attempts.
    #[default]
    Disconnected,
    /// Opening a session and subscribing.
    Connecting,
    /// Session up and every streamed symbol is live.
    Subscribed,
    /// Session up but some symbols are served by polling.
    DegradedPolling,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::DegradedPolling => "degraded-polling",
        })
    }
}

/// Logo image bytes for a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    /// Symbol the icon belongs to.
    pub symbol: Symbol,
    /// Encoded image (PNG). Empty for placeholders.
    pub bytes: Vec<u8>,
    /// `true` when the provider has no icon for the symbol.
    pub placeholder: bool,
}

impl IconImage {
    /// A downloaded icon.
    #[must_use]
    pub const fn new(symbol: Symbol, bytes: Vec<u8>) -> Self {
        Self {
            symbol,
            bytes,
            placeholder: false,
        }
    }

    /// Transparent stand-in for a symbol without an icon.
    #[must_use]
    pub const fn placeholder(symbol: Symbol) -> Self {
        Self {
            symbol,
            bytes: Vec::new(),
            placeholder: true,
        }
    }

    /// Size counted against the cache byte budget.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}
