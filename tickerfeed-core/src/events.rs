use std::time::Duration;

use rust_decimal::Decimal;

use crate::{ConnectorState, ProviderKey, Quote, SlotId, Staleness, Symbol};

/// Change notification published on the engine's event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineEvent {
    /// A tick was applied to a quote.
    QuoteUpdated(Quote),
    /// A quote's freshness changed.
    StalenessChanged {
        /// Affected symbol.
        symbol: Symbol,
        /// Previous freshness.
        from: Staleness,
        /// New freshness.
        to: Staleness,
    },
    /// A streaming provider changed connection state.
    ConnectorStateChanged {
        /// Streaming provider.
        provider: ProviderKey,
        /// Previous state.
        from: ConnectorState,
        /// New state.
        to: ConnectorState,
    },
    /// A credential was put to rest.
    CredentialCooldown {
        /// Provider of the credential.
        provider: ProviderKey,
        /// Slot that entered cooldown.
        slot: SlotId,
        /// Cooldown length.
        cooldown: Duration,
    },
    /// A credential became eligible again.
    CredentialRestored {
        /// Provider of the credential.
        provider: ProviderKey,
        /// Slot that left cooldown.
        slot: SlotId,
    },
    /// Every credential of a provider is cooling down.
    ProviderDegraded {
        /// Affected provider.
        provider: ProviderKey,
        /// Time until the first credential becomes eligible.
        retry_in: Duration,
    },
    /// At least one credential of a degraded provider is eligible again.
    ProviderRecovered {
        /// Affected provider.
        provider: ProviderKey,
    },
    /// A price moved at least the configured percentage away from the previous close.
    SignificantMove {
        /// Affected symbol.
        symbol: Symbol,
        /// Current price.
        price: Decimal,
        /// Reference close the move is measured against.
        previous_close: Decimal,
        /// Signed percent change.
        change_percent: Decimal,
    },
}

impl EngineEvent {
    /// Symbol the event is about, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            Self::QuoteUpdated(q) => Some(q.symbol()),
            Self::StalenessChanged { symbol, .. } | Self::SignificantMove { symbol, .. } => {
                Some(symbol)
            }
            _ => None,
        }
    }
}
