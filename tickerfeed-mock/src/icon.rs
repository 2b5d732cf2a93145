use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tickerfeed_core::{EngineError, IconSource, ProviderKey, Symbol};

use crate::MockBehavior;

#[derive(Default)]
struct InternalState {
    rules: HashMap<Symbol, MockBehavior<Vec<u8>>>,
    latency: Duration,
    calls: HashMap<Symbol, usize>,
}

/// Controller handle used by tests to drive a [`MockIconSource`].
#[derive(Clone)]
pub struct IconController {
    state: Arc<Mutex<InternalState>>,
}

impl IconController {
    /// Behaviour for `symbol`. Symbols without a rule have no icon.
    pub async fn set_behavior(&self, symbol: &Symbol, behavior: MockBehavior<Vec<u8>>) {
        self.state.lock().await.rules.insert(symbol.clone(), behavior);
    }

    /// Delay applied to every request.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Number of fetches for `symbol`.
    pub async fn calls(&self, symbol: &Symbol) -> usize {
        self.state.lock().await.calls.get(symbol).copied().unwrap_or(0)
    }
}

/// Icon source answering from scripted bytes.
pub struct MockIconSource {
    state: Arc<Mutex<InternalState>>,
}

impl MockIconSource {
    /// Create a source and its controller.
    #[must_use]
    pub fn new_with_controller() -> (Self, IconController) {
        let state = Arc::new(Mutex::new(InternalState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            IconController { state },
        )
    }
}

#[async_trait]
impl IconSource for MockIconSource {
    fn key(&self) -> ProviderKey {
        ProviderKey::new("mock-icons")
    }

    async fn fetch_icon(&self, symbol: &Symbol) -> Result<Option<Vec<u8>>, EngineError> {
        let (behavior, latency) = {
            let mut guard = self.state.lock().await;
            *guard.calls.entry(symbol.clone()).or_insert(0) += 1;
            (guard.rules.get(symbol).cloned(), guard.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match behavior {
            Some(MockBehavior::Return(bytes)) => Ok(Some(bytes)),
            Some(MockBehavior::Fail(e)) => Err(e),
            Some(MockBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(None),
        }
    }
}
