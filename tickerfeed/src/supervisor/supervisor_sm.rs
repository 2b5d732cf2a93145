use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tickerfeed_core::{AssetKind, ConnectorState, Instrument, ProviderKey, Symbol};
use tokio::time::Instant;

/// Which connector is currently authoritative for a symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Handed to a subscribed stream; waiting for its first tick.
    AwaitingStream { since: Instant },
    /// The stream delivered a tick recently.
    Streaming { last_tick: Instant },
    /// Served by the polling connector.
    Polling,
}

impl Route {
    const fn is_polling(self) -> bool {
        matches!(self, Self::Polling)
    }
}

#[derive(Clone, Debug)]
pub struct SymbolState {
    pub instrument: Instrument,
    /// Index of the streaming provider covering this symbol's kind.
    pub stream: Option<usize>,
    /// Index of the polling source covering this symbol's kind.
    pub poll: Option<usize>,
    /// The stream refused this symbol; it is polled for good.
    pub rejected: bool,
    pub route: Route,
}

impl SymbolState {
    const fn streamable(&self) -> bool {
        self.stream.is_some() && !self.rejected
    }
}

#[derive(Clone, Debug)]
pub struct StreamProvider {
    pub key: ProviderKey,
    pub kinds: Vec<AssetKind>,
    /// Link state as reported by the worker.
    pub link: ConnectorState,
    /// State last published.
    pub reported: ConnectorState,
    /// Symbol set last handed to the worker.
    pub assigned: Vec<Symbol>,
}

impl StreamProvider {
    #[must_use]
    pub fn new(key: ProviderKey, kinds: Vec<AssetKind>) -> Self {
        Self {
            key,
            kinds,
            link: ConnectorState::Disconnected,
            reported: ConnectorState::Disconnected,
            assigned: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PollSource {
    pub key: ProviderKey,
    pub kinds: Vec<AssetKind>,
}

impl PollSource {
    #[must_use]
    pub const fn new(key: ProviderKey, kinds: Vec<AssetKind>) -> Self {
        Self { key, kinds }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    WatchlistChanged { instruments: Vec<Instrument>, now: Instant },
    LinkState { provider: usize, state: ConnectorState, now: Instant },
    Ticked { provider: usize, symbols: Vec<Symbol>, now: Instant },
    Rejected { provider: usize, symbol: Symbol },
    LivenessTick { now: Instant },
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    EmitState { provider: ProviderKey, from: ConnectorState, to: ConnectorState },
    StartPolling { source: usize, instruments: Vec<Instrument> },
    StopPolling { source: usize, symbols: Vec<Symbol> },
    Prime { source: usize, instruments: Vec<Instrument> },
    SetStreamSymbols { provider: usize, symbols: Vec<Symbol> },
    StopAll,
}

/// Polling changes collected during one transition, flushed as grouped actions.
#[derive(Default)]
struct PollDelta {
    start: BTreeMap<usize, Vec<Instrument>>,
    stop: BTreeMap<usize, Vec<Symbol>>,
    prime: BTreeMap<usize, Vec<Instrument>>,
}

impl PollDelta {
    fn into_actions(self, actions: &mut Vec<Action>) {
        for (source, symbols) in self.stop {
            actions.push(Action::StopPolling { source, symbols });
        }
        for (source, instruments) in self.start {
            actions.push(Action::StartPolling { source, instruments });
        }
        for (source, instruments) in self.prime {
            actions.push(Action::Prime { source, instruments });
        }
    }
}

#[derive(Debug)]
pub struct Supervisor {
    pub symbols: BTreeMap<Symbol, SymbolState>,
    pub streams: Vec<StreamProvider>,
    pub polls: Vec<PollSource>,
    pub liveness_window: Duration,
    pub phase: Phase,
}

impl Supervisor {
    #[must_use]
    pub const fn new(
        streams: Vec<StreamProvider>,
        polls: Vec<PollSource>,
        liveness_window: Duration,
    ) -> Self {
        Self {
            symbols: BTreeMap::new(),
            streams,
            polls,
            liveness_window,
            phase: Phase::Running,
        }
    }

    pub fn set_liveness_window(&mut self, window: Duration) {
        self.liveness_window = window;
    }

    #[must_use]
    pub fn route(&self, symbol: &Symbol) -> Option<Route> {
        self.symbols.get(symbol).map(|s| s.route)
    }

    #[must_use]
    pub fn provider_state(&self, provider: usize) -> Option<ConnectorState> {
        self.streams.get(provider).map(|p| p.reported)
    }

    /// Symbols currently routed to polling source `source`.
    #[must_use]
    pub fn polled_by(&self, source: usize) -> Vec<Symbol> {
        self.symbols
            .values()
            .filter(|s| s.poll == Some(source) && s.route.is_polling())
            .map(|s| s.instrument.symbol().clone())
            .collect()
    }

    pub fn handle(mut self, event: Event) -> (Self, Vec<Action>) {
        if self.phase == Phase::ShuttingDown {
            return (self, Vec::new());
        }
        let mut delta = PollDelta::default();
        match event {
            Event::WatchlistChanged { instruments, now } => {
                self.apply_watchlist(instruments, now, &mut delta);
            }
            Event::LinkState { provider, state, .. } => {
                if let Some(p) = self.streams.get_mut(provider) {
                    p.link = state;
                    if matches!(
                        state,
                        ConnectorState::Disconnected | ConnectorState::Connecting
                    ) {
                        self.fail_over(|s| s.stream == Some(provider), &mut delta);
                    }
                }
            }
            Event::Ticked {
                provider,
                symbols,
                now,
            } => {
                for sym in symbols {
                    let Some(state) = self.symbols.get_mut(&sym) else {
                        continue;
                    };
                    if state.stream != Some(provider) || state.rejected {
                        continue;
                    }
                    if state.route.is_polling()
                        && let Some(source) = state.poll
                    {
                        delta.stop.entry(source).or_default().push(sym.clone());
                    }
                    state.route = Route::Streaming { last_tick: now };
                }
            }
            Event::Rejected { provider, symbol } => {
                if let Some(state) = self.symbols.get_mut(&symbol)
                    && state.stream == Some(provider)
                    && !state.rejected
                {
                    state.rejected = true;
                    if !state.route.is_polling() {
                        state.route = Route::Polling;
                        if let Some(source) = state.poll {
                            delta
                                .start
                                .entry(source)
                                .or_default()
                                .push(state.instrument.clone());
                        }
                    }
                }
            }
            Event::LivenessTick { now } => {
                let window = self.liveness_window;
                self.fail_over(
                    |s| match s.route {
                        Route::AwaitingStream { since } => now.duration_since(since) >= window,
                        Route::Streaming { last_tick } => now.duration_since(last_tick) >= window,
                        Route::Polling => false,
                    },
                    &mut delta,
                );
            }
            Event::Shutdown => {
                self.phase = Phase::ShuttingDown;
                return (self, vec![Action::StopAll]);
            }
        }

        let mut actions = Vec::new();
        delta.into_actions(&mut actions);
        self.sync_stream_symbols(&mut actions);
        self.sync_provider_states(&mut actions);
        (self, actions)
    }

    fn apply_watchlist(&mut self, instruments: Vec<Instrument>, now: Instant, delta: &mut PollDelta) {
        let wanted: HashMap<Symbol, Instrument> = instruments
            .into_iter()
            .map(|i| (i.symbol().clone(), i))
            .collect();

        let removed: Vec<Symbol> = self
            .symbols
            .iter()
            .filter(|(sym, st)| wanted.get(*sym).is_none_or(|i| i.kind() != st.instrument.kind()))
            .map(|(sym, _)| sym.clone())
            .collect();
        for sym in removed {
            if let Some(st) = self.symbols.remove(&sym)
                && st.route.is_polling()
                && let Some(source) = st.poll
            {
                delta.stop.entry(source).or_default().push(sym);
            }
        }

        let mut added: Vec<Instrument> = wanted
            .into_values()
            .filter(|i| !self.symbols.contains_key(i.symbol()))
            .collect();
        added.sort();
        for instrument in added {
            let kind = instrument.kind();
            let stream = self.streams.iter().position(|p| p.kinds.contains(&kind));
            let poll = self.polls.iter().position(|p| p.kinds.contains(&kind));
            let subscribed = stream
                .and_then(|i| self.streams.get(i))
                .is_some_and(|p| p.link == ConnectorState::Subscribed);
            let route = if subscribed {
                Route::AwaitingStream { since: now }
            } else {
                Route::Polling
            };
            if let Some(source) = poll {
                let target = if route.is_polling() {
                    &mut delta.start
                } else {
                    &mut delta.prime
                };
                target.entry(source).or_default().push(instrument.clone());
            }
            self.symbols.insert(
                instrument.symbol().clone(),
                SymbolState {
                    instrument,
                    stream,
                    poll,
                    rejected: false,
                    route,
                },
            );
        }
    }

    /// Move every non-polling symbol matching `pred` to polling.
    fn fail_over(&mut self, pred: impl Fn(&SymbolState) -> bool, delta: &mut PollDelta) {
        for st in self.symbols.values_mut() {
            if st.route.is_polling() || !pred(st) {
                continue;
            }
            st.route = Route::Polling;
            if let Some(source) = st.poll {
                delta.start.entry(source).or_default().push(st.instrument.clone());
            }
        }
    }

    fn sync_stream_symbols(&mut self, actions: &mut Vec<Action>) {
        for (idx, provider) in self.streams.iter_mut().enumerate() {
            let wanted: Vec<Symbol> = self
                .symbols
                .values()
                .filter(|s| s.stream == Some(idx) && s.streamable())
                .map(|s| s.instrument.symbol().clone())
                .collect();
            if wanted != provider.assigned {
                provider.assigned.clone_from(&wanted);
                actions.push(Action::SetStreamSymbols {
                    provider: idx,
                    symbols: wanted,
                });
            }
        }
    }

    fn sync_provider_states(&mut self, actions: &mut Vec<Action>) {
        for (idx, provider) in self.streams.iter_mut().enumerate() {
            let desired = match provider.link {
                ConnectorState::Subscribed | ConnectorState::DegradedPolling => {
                    let degraded = self
                        .symbols
                        .values()
                        .any(|s| s.stream == Some(idx) && s.streamable() && s.route.is_polling());
                    if degraded {
                        ConnectorState::DegradedPolling
                    } else {
                        ConnectorState::Subscribed
                    }
                }
                other => other,
            };
            if desired != provider.reported {
                actions.push(Action::EmitState {
                    provider: provider.key,
                    from: provider.reported,
                    to: desired,
                });
                provider.reported = desired;
            }
        }
    }
}
