use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use tickerfeed_core::{
    AssetKind, Credential, EngineError, Instrument, ProviderKey, QuoteBatch, QuoteSource,
    QuoteTick, Symbol,
};

use crate::{MockBehavior, mock_ts};

/// One recorded `fetch_quotes` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteCall {
    /// Requested symbols, in request order.
    pub symbols: Vec<Symbol>,
    /// API key used, if any.
    pub api_key: Option<String>,
}

#[derive(Default)]
struct InternalState {
    prices: HashMap<Symbol, Decimal>,
    previous_closes: HashMap<Symbol, Decimal>,
    seq: i64,
    missing: HashSet<Symbol>,
    batch_failures: VecDeque<EngineError>,
    key_rules: HashMap<String, MockBehavior<()>>,
    latency: Duration,
    calls: Vec<QuoteCall>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Controller handle used by tests to drive a [`MockQuoteSource`].
#[derive(Clone)]
pub struct QuoteController {
    state: Arc<Mutex<InternalState>>,
}

impl QuoteController {
    /// Price returned for `symbol` from now on.
    pub async fn set_price(&self, symbol: &Symbol, price: Decimal) {
        self.state.lock().await.prices.insert(symbol.clone(), price);
    }

    /// Previous close attached to every tick for `symbol`.
    pub async fn set_previous_close(&self, symbol: &Symbol, close: Decimal) {
        self.state
            .lock()
            .await
            .previous_closes
            .insert(symbol.clone(), close);
    }

    /// Leave `symbol` out of responses.
    pub async fn set_missing(&self, symbol: &Symbol, missing: bool) {
        let mut guard = self.state.lock().await;
        if missing {
            guard.missing.insert(symbol.clone());
        } else {
            guard.missing.remove(symbol);
        }
    }

    /// Fail the next whole batch with `error`. Failures queue up.
    pub async fn fail_next_batch(&self, error: EngineError) {
        self.state.lock().await.batch_failures.push_back(error);
    }

    /// Behaviour whenever `api_key` is used.
    pub async fn set_key_behavior(&self, api_key: &str, behavior: MockBehavior<()>) {
        self.state
            .lock()
            .await
            .key_rules
            .insert(api_key.to_string(), behavior);
    }

    /// Delay applied to every request.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Request log.
    pub async fn calls(&self) -> Vec<QuoteCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of requests seen.
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// Highest number of simultaneous requests observed.
    pub async fn peak_in_flight(&self) -> usize {
        self.state.lock().await.peak_in_flight
    }

    /// Clear the request log and concurrency peak.
    pub async fn clear_calls(&self) {
        let mut guard = self.state.lock().await;
        guard.calls.clear();
        guard.peak_in_flight = 0;
    }
}

/// Quote source answering from scripted prices.
pub struct MockQuoteSource {
    key: ProviderKey,
    kinds: Vec<AssetKind>,
    batch_limit: usize,
    requires_credential: bool,
    state: Arc<Mutex<InternalState>>,
}

impl MockQuoteSource {
    /// Create a source for `kinds` and its controller.
    #[must_use]
    pub fn new_with_controller(
        key: &'static str,
        kinds: &[AssetKind],
    ) -> (Self, QuoteController) {
        let state = Arc::new(Mutex::new(InternalState::default()));
        let controller = QuoteController {
            state: Arc::clone(&state),
        };
        (
            Self {
                key: ProviderKey::new(key),
                kinds: kinds.to_vec(),
                batch_limit: usize::MAX,
                requires_credential: true,
                state,
            },
            controller,
        )
    }

    /// Provider-side batch limit.
    #[must_use]
    pub const fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Serve requests without an API key.
    #[must_use]
    pub const fn without_credentials(mut self) -> Self {
        self.requires_credential = false;
        self
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    fn key(&self) -> ProviderKey {
        self.key
    }

    fn supports_kind(&self, kind: AssetKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn max_batch_size(&self) -> usize {
        self.batch_limit
    }

    fn requires_credential(&self) -> bool {
        self.requires_credential
    }

    async fn fetch_quotes(
        &self,
        instruments: &[Instrument],
        credential: Option<&Credential>,
    ) -> Result<QuoteBatch, EngineError> {
        let api_key = credential.map(|c| c.api_key().to_string());
        let (latency, key_rule, batch_failure) = {
            let mut guard = self.state.lock().await;
            guard.calls.push(QuoteCall {
                symbols: instruments.iter().map(|i| i.symbol().clone()).collect(),
                api_key: api_key.clone(),
            });
            guard.in_flight += 1;
            guard.peak_in_flight = guard.peak_in_flight.max(guard.in_flight);
            let rule = api_key
                .as_ref()
                .and_then(|k| guard.key_rules.get(k).cloned());
            (guard.latency, rule, guard.batch_failures.pop_front())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let outcome = match (key_rule, batch_failure) {
            (Some(MockBehavior::Hang), _) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            (Some(MockBehavior::Fail(e)), _) | (_, Some(e)) => Err(e),
            _ => Ok(()),
        };

        let mut guard = self.state.lock().await;
        guard.in_flight -= 1;
        outcome?;

        guard.seq += 1;
        let seq = guard.seq;
        let mut batch = QuoteBatch::default();
        for inst in instruments {
            let sym = inst.symbol();
            match guard.prices.get(sym) {
                Some(price) if !guard.missing.contains(sym) => {
                    batch.ticks.push(QuoteTick {
                        symbol: sym.clone(),
                        price: Some(*price),
                        previous_close: guard.previous_closes.get(sym).copied(),
                        ts: mock_ts(seq),
                    });
                }
                _ => batch.missing.push(sym.clone()),
            }
        }
        Ok(batch)
    }
}
