use async_trait::async_trait;

use crate::history::{HistoryRange, HistorySeries};
use crate::{AssetKind, Credential, EngineError, Instrument, ProviderKey, QuoteTick, Symbol};

/// Result of one batched quote request.
///
/// Providers tolerate partial answers: whatever was parsed lands in `ticks`, and
/// symbols without data are listed in `missing`. When part of the batch failed
/// for a reason that concerns the credential, `failure` carries it so the caller
/// can report it and retry the missing symbols.
#[derive(Debug, Clone, Default)]
pub struct QuoteBatch {
    /// Parsed observations.
    pub ticks: Vec<QuoteTick>,
    /// Requested symbols the provider did not return.
    pub missing: Vec<Symbol>,
    /// Error behind the missing symbols, if any.
    pub failure: Option<EngineError>,
}

impl QuoteBatch {
    /// A batch where every requested symbol was answered.
    #[must_use]
    pub const fn complete(ticks: Vec<QuoteTick>) -> Self {
        Self {
            ticks,
            missing: Vec::new(),
            failure: None,
        }
    }
}

/// Focused role trait for providers that answer quote requests.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Stable provider key used for credentials and logs.
    fn key(&self) -> ProviderKey;

    /// Whether this source can quote the given asset kind.
    fn supports_kind(&self, kind: AssetKind) -> bool;

    /// Largest batch the provider accepts per cycle.
    fn max_batch_size(&self) -> usize {
        usize::MAX
    }

    /// Whether requests need an API key from the credential pool.
    fn requires_credential(&self) -> bool {
        true
    }

    /// Fetch quotes for a batch of instruments.
    ///
    /// # Errors
    /// Returns an error when nothing usable came back; partial results are
    /// reported through [`QuoteBatch`] instead.
    async fn fetch_quotes(
        &self,
        instruments: &[Instrument],
        credential: Option<&Credential>,
    ) -> Result<QuoteBatch, EngineError>;
}

/// A message received on a streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// One or more trades.
    Ticks(Vec<QuoteTick>),
    /// Keep-alive frame.
    Heartbeat,
    /// The provider refused to stream a symbol.
    Rejected {
        /// Refused symbol.
        symbol: Symbol,
        /// Provider explanation.
        reason: String,
    },
    /// A frame that could not be parsed.
    Malformed {
        /// Parser diagnostic.
        detail: String,
    },
    /// Provider-level error frame not tied to a symbol.
    ProviderError {
        /// Provider message.
        msg: String,
    },
}

/// Live push session with a streaming provider.
#[async_trait]
pub trait StreamSession: Send {
    /// Add symbols to the session.
    ///
    /// # Errors
    /// Returns an error when the session can no longer be written to.
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), EngineError>;

    /// Remove symbols from the session.
    ///
    /// # Errors
    /// Returns an error when the session can no longer be written to.
    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), EngineError>;

    /// Next message, or `None` once the session is closed. Must be cancel-safe.
    async fn next_message(&mut self) -> Option<Result<StreamMessage, EngineError>>;

    /// Close the session; best effort.
    async fn close(&mut self);
}

/// Focused role trait for providers that push quotes over a session.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Stable provider key used for credentials, connector state and logs.
    fn key(&self) -> ProviderKey;

    /// Whether this source can stream the given asset kind.
    fn supports_kind(&self, kind: AssetKind) -> bool;

    /// Whether sessions need an API key from the credential pool.
    fn requires_credential(&self) -> bool {
        true
    }

    /// Open a new session.
    ///
    /// # Errors
    /// Returns a classified error when the connection or handshake fails.
    async fn connect(
        &self,
        credential: Option<&Credential>,
    ) -> Result<Box<dyn StreamSession>, EngineError>;
}

/// Focused role trait for providers that serve price history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Stable provider key used in logs.
    fn key(&self) -> ProviderKey;

    /// Fetch a series for one instrument and range.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown symbols and classified errors otherwise.
    async fn fetch_history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<HistorySeries, EngineError>;
}

/// Focused role trait for providers that serve symbol logos.
#[async_trait]
pub trait IconSource: Send + Sync {
    /// Stable provider key used in logs.
    fn key(&self) -> ProviderKey;

    /// Fetch encoded icon bytes; `Ok(None)` when the provider has no icon.
    ///
    /// # Errors
    /// Returns classified network errors.
    async fn fetch_icon(&self, symbol: &Symbol) -> Result<Option<Vec<u8>>, EngineError>;
}
