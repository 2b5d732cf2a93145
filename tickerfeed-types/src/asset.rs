use core::fmt;
use serde::{Deserialize, Serialize};

/// Asset class of a watched symbol.
///
/// The kind decides which providers may serve a symbol: equities stream and poll
/// through the equity provider, crypto polls through the crypto provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Listed shares, ETFs and similar exchange-traded instruments.
    #[default]
    Equity,
    /// Crypto assets quoted around the clock.
    Crypto,
}

impl AssetKind {
    /// Whether quotes for this kind follow exchange trading hours.
    #[must_use]
    pub const fn follows_market_hours(self) -> bool {
        matches!(self, Self::Equity)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equity => f.write_str("equity"),
            Self::Crypto => f.write_str("crypto"),
        }
    }
}
