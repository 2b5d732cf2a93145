use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tickerfeed_cache::{
    CachedSeries, ConfigCache, ConfigSource, HistoryCache, HistoryLookup, IconCache, StaticSource,
};
use tickerfeed_core::{
    AssetKind, ConnectorState, EngineConfig, EngineError, HistoryRange, HistorySource, IconImage,
    IconSource, Instrument, ProviderKey, Quote, QuoteSource, SharedCalendar, StopSignal,
    StreamSource, Symbol, TradingCalendar, UsEquityCalendar, WorkerHandle,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bus::{EventBus, Subscription};
use crate::credentials::{CredentialPool, SlotStats};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::quotes::QuoteStore;
use crate::supervisor::controller::{ConnectorStates, ControlMsg, ControllerParams, spawn_controller};
use crate::supervisor::polling::{PollWorker, spawn_poll_worker};
use crate::supervisor::streaming::{StreamWorker, spawn_stream_worker};
use crate::supervisor::supervisor_sm::{PollSource, StreamProvider, Supervisor};

const KINDS: [AssetKind; 2] = [AssetKind::Equity, AssetKind::Crypto];

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: Option<Box<dyn ConfigSource>>,
    streams: Vec<Arc<dyn StreamSource>>,
    quotes: Vec<Arc<dyn QuoteSource>>,
    history: Option<Arc<dyn HistorySource>>,
    icons: Option<Arc<dyn IconSource>>,
    calendar: Option<Arc<dyn TradingCalendar>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            streams: Vec::new(),
            quotes: Vec::new(),
            history: None,
            icons: None,
            calendar: None,
        }
    }

    /// Where configuration snapshots come from. Defaults to the built-in defaults.
    #[must_use]
    pub fn config_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.config = Some(Box::new(source));
        self
    }

    /// Use a fixed configuration.
    #[must_use]
    pub fn config(self, config: EngineConfig) -> Self {
        self.config_source(StaticSource::new(config))
    }

    /// Register a streaming provider. The first one supporting a kind serves it.
    #[must_use]
    pub fn with_stream_source(mut self, source: Arc<dyn StreamSource>) -> Self {
        self.streams.push(source);
        self
    }

    /// Register a polling quote source. The first one supporting a kind serves it.
    #[must_use]
    pub fn with_quote_source(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.quotes.push(source);
        self
    }

    #[must_use]
    pub fn with_history_source(mut self, source: Arc<dyn HistorySource>) -> Self {
        self.history = Some(source);
        self
    }

    #[must_use]
    pub fn with_icon_source(mut self, source: Arc<dyn IconSource>) -> Self {
        self.icons = Some(source);
        self
    }

    /// Trading calendar for the off-hours polling interval.
    ///
    /// Defaults to US equity hours with the configured holidays.
    #[must_use]
    pub fn with_calendar(mut self, calendar: Arc<dyn TradingCalendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    /// Build the engine. Nothing runs until [`Engine::start`].
    ///
    /// # Errors
    /// Returns `InvalidArg` when no stream or quote source is registered.
    pub fn build(self) -> Result<Engine, EngineError> {
        if self.streams.is_empty() && self.quotes.is_empty() {
            return Err(EngineError::InvalidArg(
                "at least one stream or quote source is required".into(),
            ));
        }

        let config = Arc::new(match self.config {
            Some(source) => ConfigCache::new(source),
            None => ConfigCache::new(StaticSource::default()),
        });
        let cfg = config.current();
        let metrics = Arc::new(EngineMetrics::default());
        let bus = EventBus::new(cfg.events.subscriber_capacity, Arc::clone(&metrics));
        let store = Arc::new(QuoteStore::new(&cfg, bus.clone(), Arc::clone(&metrics)));
        let pool = Arc::new(CredentialPool::new(cfg.cooldown.clone(), bus.clone()));

        let (cache_stop, cache_signal) = StopSignal::channel();
        let history = self
            .history
            .map(|source| HistoryCache::new(source, cfg.history.clone(), cache_signal.clone()));
        let icons = self
            .icons
            .map(|source| IconCache::new(source, &cfg.icons, cache_signal));
        let holidays_from_config = self.calendar.is_none();
        let calendar = SharedCalendar::new(
            self.calendar
                .unwrap_or_else(|| Arc::new(UsEquityCalendar::from_config(&cfg.market_holidays))),
        );
        let states = Arc::new(ConnectorStates::new(self.streams.iter().map(|s| s.key())));

        Ok(Engine {
            config,
            bus,
            metrics,
            store,
            pool,
            history,
            icons,
            streams: self.streams,
            quotes: self.quotes,
            calendar,
            holidays_from_config,
            states,
            cache_stop,
            runtime: Mutex::new(Runtime::Idle),
        })
    }
}

struct Running {
    control: mpsc::UnboundedSender<ControlMsg>,
    workers: Vec<WorkerHandle>,
}

enum Runtime {
    Idle,
    Running(Running),
    Stopped,
}

/// Market-data ingestion engine.
///
/// Keeps a live quote for every watched symbol by streaming where possible and
/// polling where not, and serves cached history and icons on demand.
pub struct Engine {
    config: Arc<ConfigCache>,
    bus: EventBus,
    metrics: Arc<EngineMetrics>,
    store: Arc<QuoteStore>,
    pool: Arc<CredentialPool>,
    history: Option<HistoryCache>,
    icons: Option<IconCache>,
    streams: Vec<Arc<dyn StreamSource>>,
    quotes: Vec<Arc<dyn QuoteSource>>,
    calendar: SharedCalendar,
    /// Rebuild the calendar from `market_holidays` on reload; off for injected calendars.
    holidays_from_config: bool,
    states: Arc<ConnectorStates>,
    cache_stop: watch::Sender<bool>,
    runtime: Mutex<Runtime>,
}

/// Valid, de-duplicated instruments from the configured watch-list.
fn resolve_watchlist(cfg: &EngineConfig) -> Vec<Instrument> {
    let mut seen = HashSet::new();
    cfg.watchlist
        .iter()
        .filter_map(|w| match Instrument::try_from(w) {
            Ok(i) => Some(i),
            Err(e) => {
                tracing::warn!(symbol = %w.symbol, error = %e, "skipping watch-list entry");
                None
            }
        })
        .filter(|i| seen.insert(i.symbol().clone()))
        .collect()
}

impl Engine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn provider_keys(&self) -> Vec<ProviderKey> {
        self.streams
            .iter()
            .map(|s| s.key())
            .chain(self.quotes.iter().map(|q| q.key()))
            .collect()
    }

    fn runtime(&self) -> std::sync::MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the connector workers, the supervisor and the sweep timer.
    ///
    /// # Errors
    /// Returns `InvalidArg` if already started and `ShuttingDown` after [`Engine::shutdown`].
    pub fn start(&self) -> Result<(), EngineError> {
        let mut runtime = self.runtime();
        match *runtime {
            Runtime::Idle => {}
            Runtime::Running(_) => {
                return Err(EngineError::InvalidArg("engine already started".into()));
            }
            Runtime::Stopped => return Err(EngineError::ShuttingDown),
        }

        let cfg = self.config.current();
        self.pool
            .rebuild(&cfg.credentials, &self.provider_keys(), cfg.cooldown.clone());
        let instruments = resolve_watchlist(&cfg);
        for inst in &instruments {
            self.store.watch(inst.clone());
        }

        let streams: Vec<Arc<dyn StreamSource>> = if cfg.stream.enabled {
            self.streams.clone()
        } else {
            tracing::info!("streaming disabled; every symbol is polled");
            Vec::new()
        };
        let supervisor = Supervisor::new(
            streams
                .iter()
                .map(|s| StreamProvider::new(s.key(), supported(|k| s.supports_kind(k))))
                .collect(),
            self.quotes
                .iter()
                .map(|q| PollSource::new(q.key(), supported(|k| q.supports_kind(k))))
                .collect(),
            cfg.stream.liveness_window(),
        );

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let mut workers = Vec::new();

        let mut stream_symbols = Vec::with_capacity(streams.len());
        for (index, source) in streams.into_iter().enumerate() {
            let (symbols_tx, symbols_rx) = watch::channel(Vec::new());
            stream_symbols.push(symbols_tx);
            let (stop_tx, stop) = StopSignal::channel();
            let worker = StreamWorker {
                index,
                source,
                pool: Arc::clone(&self.pool),
                store: Arc::clone(&self.store),
                metrics: Arc::clone(&self.metrics),
                config: Arc::clone(&self.config),
                control: control_tx.clone(),
            };
            let join = spawn_stream_worker(worker, symbols_rx, stop);
            workers.push(WorkerHandle::new("stream", join, stop_tx));
        }

        let mut poll_commands = Vec::with_capacity(self.quotes.len());
        for source in &self.quotes {
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            poll_commands.push(cmd_tx);
            let (stop_tx, stop) = StopSignal::channel();
            let worker = PollWorker {
                source: Arc::clone(source),
                pool: Arc::clone(&self.pool),
                store: Arc::clone(&self.store),
                metrics: Arc::clone(&self.metrics),
                config: Arc::clone(&self.config),
                calendar: Arc::new(self.calendar.clone()),
            };
            let join = spawn_poll_worker(worker, cmd_rx, stop);
            workers.push(WorkerHandle::new("poll", join, stop_tx));
        }

        let (stop_tx, stop) = StopSignal::channel();
        let join = spawn_controller(
            ControllerParams {
                supervisor,
                stream_symbols,
                poll_commands,
                states: Arc::clone(&self.states),
                bus: self.bus.clone(),
            },
            control_rx,
            stop,
        );
        workers.push(WorkerHandle::new("supervisor", join, stop_tx));

        let (stop_tx, stop) = StopSignal::channel();
        workers.push(WorkerHandle::new("sweep", self.spawn_sweep(stop), stop_tx));

        let _ = control_tx.send(ControlMsg::Watchlist(instruments));
        tracing::info!(
            symbols = self.store.len(),
            workers = workers.len(),
            "engine started"
        );
        *runtime = Runtime::Running(Running {
            control: control_tx,
            workers,
        });
        Ok(())
    }

    fn spawn_sweep(&self, mut stop: StopSignal) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let pool = Arc::clone(&self.pool);
        let history = self.history.clone();
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            loop {
                let period = config.current().staleness.sweep_interval();
                tokio::select! {
                    biased;
                    () = stop.stopped() => return,
                    () = tokio::time::sleep(period) => {}
                }
                let now = Instant::now();
                let flipped = store.sweep(now);
                pool.refresh(now);
                let purged = history.as_ref().map_or(0, |h| h.purge_expired(now));
                if flipped > 0 || purged > 0 {
                    tracing::debug!(stale = flipped, purged, "sweep");
                }
            }
        })
    }

    /// Stop every worker: signal, wait up to `shutdown_grace_ms`, then abort.
    ///
    /// Pending history and icon fetches resolve to `ShuttingDown`. Idempotent.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.runtime(), Runtime::Stopped);
        let _ = self.cache_stop.send(true);
        let Runtime::Running(running) = previous else {
            return;
        };
        drop(running.control);

        let grace = self.config.current().shutdown_grace();
        let deadline = Instant::now() + grace;
        for worker in &running.workers {
            worker.signal();
        }
        let mut aborted = 0usize;
        for worker in running.workers {
            let name = worker.name();
            if !worker.stop(deadline.saturating_duration_since(Instant::now())).await {
                tracing::debug!(worker = name, "aborted");
                aborted += 1;
            }
        }
        tracing::info!(aborted, "engine stopped");
    }

    /// Whether [`Engine::start`] ran and [`Engine::shutdown`] has not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.runtime(), Runtime::Running(_))
    }

    /// Reload configuration and apply it to the running engine.
    ///
    /// Credentials, cache bounds, staleness and display settings and the watch-list
    /// take effect immediately; poll intervals and batch sizes on the next cycle.
    pub fn config_changed(&self) {
        self.config.invalidate();
        let cfg = self.config.current();

        self.pool
            .rebuild(&cfg.credentials, &self.provider_keys(), cfg.cooldown.clone());
        self.store.apply_config(&cfg);
        if let Some(history) = &self.history {
            history.apply_config(cfg.history.clone());
        }
        if let Some(icons) = &self.icons {
            icons.apply_config(&cfg.icons);
        }
        if self.holidays_from_config {
            self.calendar
                .replace(Arc::new(UsEquityCalendar::from_config(&cfg.market_holidays)));
        }

        let instruments = resolve_watchlist(&cfg);
        let keep: HashSet<Symbol> = instruments.iter().map(|i| i.symbol().clone()).collect();
        let removed = self.store.retain(&keep);
        let added = instruments
            .iter()
            .filter(|i| self.store.watch((*i).clone()))
            .count();
        tracing::info!(added, removed = removed.len(), "configuration reloaded");

        if let Runtime::Running(running) = &*self.runtime() {
            let _ = running.control.send(ControlMsg::Watchlist(instruments));
            let _ = running
                .control
                .send(ControlMsg::LivenessWindow(cfg.stream.liveness_window()));
        }
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.current()
    }

    /// Every watched quote, in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Quote> {
        self.store.snapshot()
    }

    /// Latest quote for `symbol`.
    #[must_use]
    pub fn quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.store.get(symbol)
    }

    /// Receive engine events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    fn history_cache(&self) -> Result<&HistoryCache, EngineError> {
        self.history
            .as_ref()
            .ok_or_else(|| EngineError::not_found("history source"))
    }

    /// Non-blocking history lookup; starts a fetch when needed.
    ///
    /// # Errors
    /// `NotFound` when no history source is registered.
    pub fn history_lookup(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<HistoryLookup, EngineError> {
        Ok(self.history_cache()?.get(instrument, range))
    }

    /// Cached or freshly fetched history series.
    ///
    /// # Errors
    /// `NotFound` without a history source; otherwise the fetch error when nothing
    /// is cached, or `ShuttingDown`.
    pub async fn history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<CachedSeries, EngineError> {
        self.history_cache()?.fetch(instrument, range).await
    }

    /// Icon for `symbol`, or a placeholder when the provider has none.
    ///
    /// # Errors
    /// `NotFound` without an icon source; network errors are returned uncached.
    pub async fn icon(&self, symbol: &Symbol) -> Result<Arc<IconImage>, EngineError> {
        self.icons
            .as_ref()
            .ok_or_else(|| EngineError::not_found("icon source"))?
            .get_or_fetch(symbol)
            .await
    }

    /// Drop counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Published state of every streaming provider.
    #[must_use]
    pub fn connector_states(&self) -> Vec<(ProviderKey, ConnectorState)> {
        self.states.all()
    }

    /// Published state of one streaming provider.
    #[must_use]
    pub fn connector_state(&self, provider: ProviderKey) -> Option<ConnectorState> {
        self.states.get(provider)
    }

    /// Credential counters for `provider`.
    #[must_use]
    pub fn credential_stats(&self, provider: ProviderKey) -> Vec<SlotStats> {
        self.pool.stats(provider)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.cache_stop.send(true);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn supported(f: impl Fn(AssetKind) -> bool) -> Vec<AssetKind> {
    KINDS.into_iter().filter(|&k| f(k)).collect()
}
