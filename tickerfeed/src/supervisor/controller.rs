use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tickerfeed_core::{
    ConnectorState, EngineEvent, Instrument, ProviderKey, StopSignal, Symbol,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::polling::PollCommand;
use super::supervisor_sm as sm;
use crate::bus::EventBus;

/// Reports from the connector workers and the engine to the supervisor.
#[derive(Debug, Clone)]
pub enum ControlMsg {
    Watchlist(Vec<Instrument>),
    Link { provider: usize, state: ConnectorState },
    Ticked { provider: usize, symbols: Vec<Symbol> },
    Rejected { provider: usize, symbol: Symbol },
    LivenessWindow(Duration),
}

/// Last published state of every streaming provider.
#[derive(Debug, Default)]
pub struct ConnectorStates(RwLock<Vec<(ProviderKey, ConnectorState)>>);

impl ConnectorStates {
    pub fn new(providers: impl IntoIterator<Item = ProviderKey>) -> Self {
        Self(RwLock::new(
            providers
                .into_iter()
                .map(|k| (k, ConnectorState::Disconnected))
                .collect(),
        ))
    }

    fn set(&self, provider: ProviderKey, state: ConnectorState) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = guard.iter_mut().find(|(k, _)| *k == provider) {
            slot.1 = state;
        }
    }

    pub fn get(&self, provider: ProviderKey) -> Option<ConnectorState> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(k, _)| *k == provider)
            .map(|(_, s)| *s)
    }

    pub fn all(&self) -> Vec<(ProviderKey, ConnectorState)> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub struct ControllerParams {
    pub supervisor: sm::Supervisor,
    /// Symbol set per streaming worker, aligned with `supervisor.streams`.
    pub stream_symbols: Vec<watch::Sender<Vec<Symbol>>>,
    /// Command queue per polling worker, aligned with `supervisor.polls`.
    pub poll_commands: Vec<mpsc::UnboundedSender<PollCommand>>,
    pub states: Arc<ConnectorStates>,
    pub bus: EventBus,
}

fn liveness_interval(window: Duration) -> Interval {
    let period = (window / 10).clamp(Duration::from_millis(100), Duration::from_secs(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub fn spawn_controller(
    params: ControllerParams,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    mut stop: StopSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ControllerParams {
            mut supervisor,
            stream_symbols,
            poll_commands,
            states,
            bus,
        } = params;
        let mut liveness = liveness_interval(supervisor.liveness_window);

        loop {
            let event = tokio::select! {
                biased;
                () = stop.stopped() => sm::Event::Shutdown,
                msg = control_rx.recv() => match msg {
                    None => sm::Event::Shutdown,
                    Some(ControlMsg::Watchlist(instruments)) => sm::Event::WatchlistChanged {
                        instruments,
                        now: Instant::now(),
                    },
                    Some(ControlMsg::Link { provider, state }) => sm::Event::LinkState {
                        provider,
                        state,
                        now: Instant::now(),
                    },
                    Some(ControlMsg::Ticked { provider, symbols }) => sm::Event::Ticked {
                        provider,
                        symbols,
                        now: Instant::now(),
                    },
                    Some(ControlMsg::Rejected { provider, symbol }) => {
                        sm::Event::Rejected { provider, symbol }
                    }
                    Some(ControlMsg::LivenessWindow(window)) => {
                        if window != supervisor.liveness_window {
                            supervisor.set_liveness_window(window);
                            liveness = liveness_interval(window);
                        }
                        continue;
                    }
                },
                _ = liveness.tick() => sm::Event::LivenessTick { now: Instant::now() },
            };

            let (next, actions) = supervisor.handle(event);
            supervisor = next;

            for action in actions {
                match action {
                    sm::Action::EmitState { provider, from, to } => {
                        tracing::info!(provider = %provider, %from, %to, "connector state changed");
                        states.set(provider, to);
                        bus.publish(EngineEvent::ConnectorStateChanged { provider, from, to });
                    }
                    sm::Action::StartPolling {
                        source,
                        instruments,
                    } => {
                        tracing::debug!(source, count = instruments.len(), "failing over to polling");
                        if let Some(tx) = poll_commands.get(source) {
                            let _ = tx.send(PollCommand::Assign(instruments));
                        }
                    }
                    sm::Action::StopPolling { source, symbols } => {
                        tracing::debug!(source, count = symbols.len(), "releasing polled symbols");
                        if let Some(tx) = poll_commands.get(source) {
                            let _ = tx.send(PollCommand::Release(symbols));
                        }
                    }
                    sm::Action::Prime {
                        source,
                        instruments,
                    } => {
                        if let Some(tx) = poll_commands.get(source) {
                            let _ = tx.send(PollCommand::Prime(instruments));
                        }
                    }
                    sm::Action::SetStreamSymbols { provider, symbols } => {
                        if let Some(tx) = stream_symbols.get(provider) {
                            tx.send_replace(symbols);
                        }
                    }
                    sm::Action::StopAll => {
                        tracing::debug!("supervisor shutting down");
                        return;
                    }
                }
            }
        }
    })
}
