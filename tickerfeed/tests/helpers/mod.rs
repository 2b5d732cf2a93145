// Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tickerfeed::{
    ConnectorState, Engine, EngineConfig, EngineEvent, ProviderKey, StaticSource, Subscription,
    Symbol,
};
use tickerfeed_core::{AlwaysOpen, AssetKind, QuoteTick, StreamMessage, TradingCalendar};
use tickerfeed_mock::{
    HistoryController, IconController, MockHistorySource, MockIconSource, MockQuoteSource,
    MockStreamSource, QuoteController, StreamController, mock_ts,
};
use tickerfeed_types::{CredentialConfig, WatchedSymbol};

pub const WS: ProviderKey = ProviderKey::new("ws");
pub const REST: ProviderKey = ProviderKey::new("rest");
pub const COINS: ProviderKey = ProviderKey::new("coins");

/// Provider-side batch limit of the mock REST source.
pub const REST_BATCH_LIMIT: usize = 5;

pub fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

pub fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

fn cred(provider: &str, key: &str) -> CredentialConfig {
    CredentialConfig {
        provider: provider.to_string(),
        api_key: key.to_string(),
    }
}

/// Defaults plus keys for `ws` and two keys for `rest`; `coins` is keyless.
pub fn config(watchlist: Vec<WatchedSymbol>) -> EngineConfig {
    EngineConfig {
        credentials: vec![cred("ws", "ws-key"), cred("rest", "r1"), cred("rest", "r2")],
        watchlist,
        ..EngineConfig::default()
    }
}

pub fn equities(symbols: &[&str]) -> Vec<WatchedSymbol> {
    symbols.iter().map(|s| WatchedSymbol::equity(*s)).collect()
}

/// A market that is never open.
pub struct Closed;

impl TradingCalendar for Closed {
    fn is_market_open(&self, _at: chrono::DateTime<chrono::Utc>) -> bool {
        false
    }
}

/// A market that stays closed until the test opens it.
#[derive(Clone, Default)]
pub struct Bell(Arc<AtomicBool>);

impl Bell {
    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl TradingCalendar for Bell {
    fn is_market_open(&self, _at: chrono::DateTime<chrono::Utc>) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub engine: Engine,
    pub events: Subscription,
    pub source: Arc<StaticSource>,
    pub stream: StreamController,
    pub rest: QuoteController,
    pub coins: QuoteController,
    pub history: HistoryController,
    pub icons: IconController,
    seq: AtomicI64,
}

/// Equity stream, equity REST source and crypto source, market always open.
pub fn harness(config: EngineConfig) -> Harness {
    build(config, true, Arc::new(AlwaysOpen))
}

/// Same sources without the stream.
pub fn polling_harness(config: EngineConfig) -> Harness {
    build(config, false, Arc::new(AlwaysOpen))
}

pub fn build(
    config: EngineConfig,
    with_stream: bool,
    calendar: Arc<dyn TradingCalendar>,
) -> Harness {
    assemble(config, with_stream, Some(calendar))
}

/// Polling sources with the engine's own calendar built from `market_holidays`.
pub fn holiday_harness(config: EngineConfig) -> Harness {
    assemble(config, false, None)
}

fn assemble(
    config: EngineConfig,
    with_stream: bool,
    calendar: Option<Arc<dyn TradingCalendar>>,
) -> Harness {
    let (stream_src, stream) = MockStreamSource::new_with_controller("ws", &[AssetKind::Equity]);
    let (rest_src, rest) = MockQuoteSource::new_with_controller("rest", &[AssetKind::Equity]);
    let (coins_src, coins) = MockQuoteSource::new_with_controller("coins", &[AssetKind::Crypto]);
    let (history_src, history) = MockHistorySource::new_with_controller();
    let (icon_src, icons) = MockIconSource::new_with_controller();
    let source = Arc::new(StaticSource::new(config));

    let mut builder = Engine::builder()
        .config_source(Arc::clone(&source))
        .with_quote_source(Arc::new(rest_src.with_batch_limit(REST_BATCH_LIMIT)))
        .with_quote_source(Arc::new(coins_src.without_credentials()))
        .with_history_source(Arc::new(history_src))
        .with_icon_source(Arc::new(icon_src));
    if let Some(calendar) = calendar {
        builder = builder.with_calendar(calendar);
    }
    if with_stream {
        builder = builder.with_stream_source(Arc::new(stream_src));
    }
    let engine = builder.build().unwrap();
    let events = engine.subscribe();

    Harness {
        engine,
        events,
        source,
        stream,
        rest,
        coins,
        history,
        icons,
        seq: AtomicI64::new(1_000),
    }
}

impl Harness {
    /// Push a stream trade stamped later than anything the polling mocks produce.
    pub async fn trade(&self, symbol: &str, price: i64) -> bool {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.stream
            .push(StreamMessage::Ticks(vec![QuoteTick::new(
                sym(symbol),
                dec(price),
                mock_ts(seq),
            )]))
            .await
    }

    pub async fn wait_for(&mut self, pred: impl FnMut(&EngineEvent) -> bool) -> EngineEvent {
        wait_for(&mut self.events, pred).await
    }

    pub async fn wait_for_state(&mut self, to: ConnectorState) {
        self.wait_for(|e| {
            matches!(e, EngineEvent::ConnectorStateChanged { provider, to: t, .. } if *provider == WS && *t == to)
        })
        .await;
    }

    /// Replace the served configuration and notify the engine.
    pub fn reconfigure(&self, config: EngineConfig) {
        self.source.set(config);
        self.engine.config_changed();
    }

    /// Symbols of every REST request since the log was last cleared.
    pub async fn rest_requests(&self) -> Vec<Vec<String>> {
        self.rest
            .calls()
            .await
            .into_iter()
            .map(|c| c.symbols.iter().map(ToString::to_string).collect())
            .collect()
    }
}

/// Start a streaming engine over AAPL and MSFT and bring both onto the stream.
///
/// REST prices are 100 and 200; the request log is cleared on return.
pub async fn streaming_harness() -> Harness {
    let mut h = harness(config(equities(&["AAPL", "MSFT"])));
    h.rest.set_price(&sym("AAPL"), dec(100)).await;
    h.rest.set_price(&sym("MSFT"), dec(200)).await;
    h.engine.start().unwrap();

    h.wait_for_state(ConnectorState::DegradedPolling).await;
    assert!(h.trade("AAPL", 101).await);
    assert!(h.trade("MSFT", 201).await);
    h.wait_for_state(ConnectorState::Subscribed).await;
    h.rest.clear_calls().await;
    h
}

/// Next event matching `pred`, skipping others. Panics after two virtual minutes.
pub async fn wait_for(
    events: &mut Subscription,
    mut pred: impl FnMut(&EngineEvent) -> bool,
) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Some(e) if pred(&e) => return e,
                Some(_) => {}
                None => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `check` every 50ms of virtual time until it holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 20s");
}

/// Let spawned tasks run without moving the clock far.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
