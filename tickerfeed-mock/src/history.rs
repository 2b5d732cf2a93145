use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use tickerfeed_core::{
    EngineError, HistoryPoint, HistoryRange, HistorySeries, HistorySource, Instrument,
    ProviderKey, Symbol,
};

use crate::{MockBehavior, mock_ts};

#[derive(Default)]
struct InternalState {
    rules: HashMap<Symbol, MockBehavior<Vec<Decimal>>>,
    latency: Duration,
    calls: HashMap<(Symbol, HistoryRange), usize>,
}

/// Controller handle used by tests to drive a [`MockHistorySource`].
#[derive(Clone)]
pub struct HistoryController {
    state: Arc<Mutex<InternalState>>,
}

impl HistoryController {
    /// Behaviour for `symbol`; `Return` lists prices at one-minute spacing.
    pub async fn set_behavior(&self, symbol: &Symbol, behavior: MockBehavior<Vec<Decimal>>) {
        self.state.lock().await.rules.insert(symbol.clone(), behavior);
    }

    /// Delay applied to every request.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Number of fetches for one key.
    pub async fn calls(&self, symbol: &Symbol, range: HistoryRange) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&(symbol.clone(), range))
            .copied()
            .unwrap_or(0)
    }

    /// Number of fetches across all keys.
    pub async fn total_calls(&self) -> usize {
        self.state.lock().await.calls.values().sum()
    }
}

/// History source answering from scripted price lists.
pub struct MockHistorySource {
    state: Arc<Mutex<InternalState>>,
}

impl MockHistorySource {
    /// Create a source and its controller.
    #[must_use]
    pub fn new_with_controller() -> (Self, HistoryController) {
        let state = Arc::new(Mutex::new(InternalState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            HistoryController { state },
        )
    }
}

#[async_trait]
impl HistorySource for MockHistorySource {
    fn key(&self) -> ProviderKey {
        ProviderKey::new("mock-history")
    }

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<HistorySeries, EngineError> {
        let symbol = instrument.symbol();
        let (behavior, latency) = {
            let mut guard = self.state.lock().await;
            *guard.calls.entry((symbol.clone(), range)).or_insert(0) += 1;
            (guard.rules.get(symbol).cloned(), guard.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match behavior {
            Some(MockBehavior::Return(prices)) => {
                let points = prices
                    .into_iter()
                    .zip(0i64..)
                    .map(|(price, i)| HistoryPoint {
                        ts: mock_ts(i * 60),
                        price,
                    })
                    .collect();
                Ok(HistorySeries::new(symbol.clone(), range, points))
            }
            Some(MockBehavior::Fail(e)) => Err(e),
            Some(MockBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(EngineError::not_found(format!("history for {symbol}"))),
        }
    }
}
