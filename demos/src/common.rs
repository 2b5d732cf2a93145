use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tickerfeed::{AssetKind, Engine, EngineBuilder, EngineConfig, EngineError, Symbol};
use tickerfeed_mock::{
    MockBehavior, MockHistorySource, MockIconSource, MockQuoteSource, MockStreamSource,
    StreamController,
};
use tickerfeed_providers::{
    CoinGeckoQuotes, FinnhubQuotes, FinnhubStream, GithubIcons, YahooHistory, build_client,
};
use tickerfeed_types::{CredentialConfig, WatchedSymbol};
use tokio::task::JoinHandle;

const MOCK_ENV: &str = "TICKERFEED_DEMOS_USE_MOCK";

/// Whether demos run against scripted sources instead of the network.
#[must_use]
pub fn use_mock() -> bool {
    std::env::var(MOCK_ENV).is_ok()
}

/// Configuration shared by the demos: a mixed watch-list with keys from the environment.
///
/// `FINNHUB_API_KEY` may hold several comma-separated keys; `COINGECKO_API_KEY` is optional.
#[must_use]
pub fn demo_config() -> EngineConfig {
    let mut cfg = EngineConfig {
        watchlist: vec![
            WatchedSymbol::equity("AAPL"),
            WatchedSymbol::equity("MSFT"),
            WatchedSymbol::crypto("BTC"),
            WatchedSymbol::crypto("ETH"),
        ],
        shutdown_grace_ms: 1_000,
        ..EngineConfig::default()
    };
    cfg.poll.interval_ms = 2_000;
    cfg.display.significant_move_percent = Some(2.0);
    for (provider, var) in [("finnhub", "FINNHUB_API_KEY"), ("coingecko", "COINGECKO_API_KEY")] {
        if let Ok(keys) = std::env::var(var) {
            cfg.credentials.extend(
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| CredentialConfig {
                        provider: provider.to_string(),
                        api_key: k.to_string(),
                    }),
            );
        }
    }
    cfg
}

/// An engine builder wired to every source, plus whatever keeps the mock feed moving.
pub struct DemoEngine {
    /// Builder with all sources registered.
    pub builder: EngineBuilder,
    feeder: Option<JoinHandle<()>>,
}

impl DemoEngine {
    /// Build and start the engine.
    ///
    /// # Errors
    /// Propagates builder and start errors.
    pub fn start(self) -> Result<RunningDemo, EngineError> {
        let engine = self.builder.build()?;
        engine.start()?;
        Ok(RunningDemo {
            engine,
            feeder: self.feeder,
        })
    }
}

/// A started demo engine.
pub struct RunningDemo {
    /// The engine.
    pub engine: Engine,
    feeder: Option<JoinHandle<()>>,
}

impl RunningDemo {
    /// Stop the mock feed and shut the engine down.
    pub async fn shutdown(self) {
        if let Some(feeder) = self.feeder {
            feeder.abort();
        }
        self.engine.shutdown().await;
    }
}

/// Return an engine builder for demos.
///
/// Uses scripted sources when `TICKERFEED_DEMOS_USE_MOCK` is set and the public
/// providers otherwise.
///
/// # Errors
/// Returns `InvalidArg` when the HTTP client cannot be built from the network settings.
pub async fn demo_engine(cfg: EngineConfig) -> Result<DemoEngine, EngineError> {
    if use_mock() {
        println!("--- (Using mock sources) ---");
        return Ok(mock_engine(cfg).await);
    }

    let client = build_client(&cfg.network)?;
    let icons = GithubIcons::new(client.clone()).with_cache_dir(cfg.icons.cache_dir.clone());
    let builder = Engine::builder()
        .config(cfg)
        .with_stream_source(Arc::new(FinnhubStream::new()))
        .with_quote_source(Arc::new(FinnhubQuotes::new(client.clone())))
        .with_quote_source(Arc::new(CoinGeckoQuotes::new(client.clone())))
        .with_history_source(Arc::new(YahooHistory::new(client)))
        .with_icon_source(Arc::new(icons));
    Ok(DemoEngine {
        builder,
        feeder: None,
    })
}

fn price(units: i64, scale: u32) -> Decimal {
    Decimal::new(units, scale)
}

async fn mock_engine(cfg: EngineConfig) -> DemoEngine {
    let (stream, stream_ctl) =
        MockStreamSource::new_with_controller("finnhub", &[AssetKind::Equity]);
    let (rest, equity_ctl) =
        MockQuoteSource::new_with_controller("finnhub-rest", &[AssetKind::Equity]);
    let (crypto, crypto_ctl) =
        MockQuoteSource::new_with_controller("coingecko", &[AssetKind::Crypto]);
    let (history, history_ctl) = MockHistorySource::new_with_controller();
    let (icons, icon_ctl) = MockIconSource::new_with_controller();

    let seeds = [
        ("AAPL", price(18_950, 2), price(18_700, 2)),
        ("MSFT", price(41_525, 2), price(41_800, 2)),
        ("BTC", price(6_650_000, 2), price(6_400_000, 2)),
        ("ETH", price(352_010, 2), price(355_000, 2)),
    ];
    for (ticker, last, close) in seeds {
        let Ok(symbol) = Symbol::new(ticker) else {
            continue;
        };
        for ctl in [&equity_ctl, &crypto_ctl] {
            ctl.set_price(&symbol, last).await;
            ctl.set_previous_close(&symbol, close).await;
        }
        let bars = (0..30i64).map(|i| close + Decimal::new(i * 25, 2)).collect();
        history_ctl
            .set_behavior(&symbol, MockBehavior::Return(bars))
            .await;
    }
    if let Ok(aapl) = Symbol::new("AAPL") {
        icon_ctl
            .set_behavior(&aapl, MockBehavior::Return(b"\x89PNG\r\n\x1a\n".to_vec()))
            .await;
    }

    let equities: Vec<Symbol> = cfg
        .watchlist
        .iter()
        .filter(|w| w.kind == AssetKind::Equity)
        .filter_map(|w| Symbol::new(&w.symbol).ok())
        .collect();
    let feeder = tokio::spawn(feed_trades(stream_ctl, equities));

    let builder = Engine::builder()
        .config(cfg)
        .with_stream_source(Arc::new(stream.without_credentials()))
        .with_quote_source(Arc::new(rest.with_batch_limit(10).without_credentials()))
        .with_quote_source(Arc::new(crypto.without_credentials()))
        .with_history_source(Arc::new(history))
        .with_icon_source(Arc::new(icons));
    DemoEngine {
        builder,
        feeder: Some(feeder),
    }
}

/// Push a trade for every equity every 200ms, nudging prices up.
async fn feed_trades(stream: StreamController, symbols: Vec<Symbol>) {
    let mut tick = 0i64;
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tick += 1;
        for symbol in &symbols {
            stream.push_trade(symbol, price(19_000 + tick, 2)).await;
        }
    }
}

/// Print a one-line view of every watched quote.
pub fn print_snapshot(engine: &Engine) {
    for quote in engine.snapshot() {
        let price = quote
            .price
            .map_or_else(|| "-".to_string(), |p| p.round_dp(2).to_string());
        let change = quote
            .change_percent
            .map_or_else(String::new, |c| format!("{:+}%", c.round_dp(2)));
        println!(
            "{:<6} {:>12} {:>9} [{}]",
            quote.symbol(),
            price,
            change,
            quote.staleness
        );
    }
}
