use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, mpsc};

use tickerfeed_core::{
    AssetKind, Credential, EngineError, ProviderKey, QuoteTick, StreamMessage, StreamSession,
    StreamSource, Symbol,
};

use crate::{MockBehavior, mock_ts};

/// Something the engine did to a mock stream, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A session was opened with this API key.
    Connected(Option<String>),
    /// Symbols subscribed on the live session.
    Subscribed(Vec<Symbol>),
    /// Symbols unsubscribed on the live session.
    Unsubscribed(Vec<Symbol>),
    /// The engine closed the session.
    Closed,
}

#[derive(Default)]
struct InternalState {
    connect_rules: VecDeque<MockBehavior<()>>,
    subscribe_failures: VecDeque<EngineError>,
    live: Option<mpsc::UnboundedSender<Result<StreamMessage, EngineError>>>,
    subscribed: BTreeSet<Symbol>,
    events: Vec<StreamEvent>,
    connects: usize,
    seq: i64,
}

/// Controller handle used by tests to drive a [`MockStreamSource`].
#[derive(Clone)]
pub struct StreamController {
    state: Arc<Mutex<InternalState>>,
}

impl StreamController {
    /// Behaviour of the next `connect` call. Rules queue up; once empty, connects succeed.
    pub async fn push_connect_behavior(&self, behavior: MockBehavior<()>) {
        self.state.lock().await.connect_rules.push_back(behavior);
    }

    /// Fail the next subscribe or unsubscribe on the live session.
    pub async fn fail_next_subscribe(&self, error: EngineError) {
        self.state.lock().await.subscribe_failures.push_back(error);
    }

    /// Deliver a message on the live session.
    ///
    /// Returns `false` when no session is open.
    pub async fn push(&self, message: StreamMessage) -> bool {
        let guard = self.state.lock().await;
        guard
            .live
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(message)).is_ok())
    }

    /// Deliver a trade for `symbol` with a strictly increasing timestamp.
    pub async fn push_trade(&self, symbol: &Symbol, price: Decimal) -> bool {
        let seq = {
            let mut guard = self.state.lock().await;
            guard.seq += 1;
            guard.seq
        };
        self.push(StreamMessage::Ticks(vec![QuoteTick::new(
            symbol.clone(),
            price,
            mock_ts(seq),
        )]))
        .await
    }

    /// Deliver a transport error on the live session.
    pub async fn push_error(&self, error: EngineError) -> bool {
        let guard = self.state.lock().await;
        guard.live.as_ref().is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Drop the live session from the provider side.
    pub async fn disconnect(&self) {
        let mut guard = self.state.lock().await;
        guard.live = None;
        guard.subscribed.clear();
    }

    /// Whether a session is open.
    pub async fn is_connected(&self) -> bool {
        self.state
            .lock()
            .await
            .live
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Symbols currently subscribed on the live session.
    pub async fn subscribed(&self) -> BTreeSet<Symbol> {
        self.state.lock().await.subscribed.clone()
    }

    /// Number of successful connects.
    pub async fn connect_count(&self) -> usize {
        self.state.lock().await.connects
    }

    /// Ordered log of session events.
    pub async fn events(&self) -> Vec<StreamEvent> {
        self.state.lock().await.events.clone()
    }
}

/// Streaming source whose sessions are fed by a [`StreamController`].
pub struct MockStreamSource {
    key: ProviderKey,
    kinds: Vec<AssetKind>,
    requires_credential: bool,
    state: Arc<Mutex<InternalState>>,
}

impl MockStreamSource {
    /// Create a source for `kinds` and its controller.
    #[must_use]
    pub fn new_with_controller(
        key: &'static str,
        kinds: &[AssetKind],
    ) -> (Self, StreamController) {
        let state = Arc::new(Mutex::new(InternalState::default()));
        let controller = StreamController {
            state: Arc::clone(&state),
        };
        (
            Self {
                key: ProviderKey::new(key),
                kinds: kinds.to_vec(),
                requires_credential: true,
                state,
            },
            controller,
        )
    }

    /// Open sessions without an API key.
    #[must_use]
    pub const fn without_credentials(mut self) -> Self {
        self.requires_credential = false;
        self
    }
}

#[async_trait]
impl StreamSource for MockStreamSource {
    fn key(&self) -> ProviderKey {
        self.key
    }

    fn supports_kind(&self, kind: AssetKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn requires_credential(&self) -> bool {
        self.requires_credential
    }

    async fn connect(
        &self,
        credential: Option<&Credential>,
    ) -> Result<Box<dyn StreamSession>, EngineError> {
        let rule = self.state.lock().await.connect_rules.pop_front();
        match rule {
            Some(MockBehavior::Fail(e)) => return Err(e),
            Some(MockBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(MockBehavior::Return(())) | None => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.state.lock().await;
        guard.live = Some(tx);
        guard.subscribed.clear();
        guard.connects += 1;
        guard
            .events
            .push(StreamEvent::Connected(credential.map(|c| c.api_key().to_string())));
        Ok(Box::new(MockSession {
            rx,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    rx: mpsc::UnboundedReceiver<Result<StreamMessage, EngineError>>,
    state: Arc<Mutex<InternalState>>,
}

#[async_trait]
impl StreamSession for MockSession {
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), EngineError> {
        let mut guard = self.state.lock().await;
        if let Some(e) = guard.subscribe_failures.pop_front() {
            return Err(e);
        }
        guard.subscribed.extend(symbols.iter().cloned());
        guard.events.push(StreamEvent::Subscribed(symbols.to_vec()));
        Ok(())
    }

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), EngineError> {
        let mut guard = self.state.lock().await;
        if let Some(e) = guard.subscribe_failures.pop_front() {
            return Err(e);
        }
        for s in symbols {
            guard.subscribed.remove(s);
        }
        guard.events.push(StreamEvent::Unsubscribed(symbols.to_vec()));
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<StreamMessage, EngineError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
        self.state.lock().await.events.push(StreamEvent::Closed);
    }
}
