use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tickerfeed_cache::ConfigCache;
use tickerfeed_core::{
    ConnectorState, Credential, EngineError, StopSignal, StreamMessage, StreamSession,
    StreamSource, Symbol,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::backoff::Backoff;
use super::controller::ControlMsg;
use crate::credentials::{CredentialPool, Outcome};
use crate::metrics::EngineMetrics;
use crate::quotes::QuoteStore;

/// Everything a streaming worker needs, owned by its task.
pub struct StreamWorker {
    pub index: usize,
    pub source: Arc<dyn StreamSource>,
    pub pool: Arc<CredentialPool>,
    pub store: Arc<QuoteStore>,
    pub metrics: Arc<EngineMetrics>,
    pub config: Arc<ConfigCache>,
    pub control: mpsc::UnboundedSender<ControlMsg>,
}

/// Why a live session ended.
enum SessionEnd {
    /// The symbol set became empty.
    Idle,
    /// The provider closed the session.
    Closed,
    Failed(EngineError),
    Stopped,
}

pub fn spawn_stream_worker(
    worker: StreamWorker,
    symbols: watch::Receiver<Vec<Symbol>>,
    stop: StopSignal,
) -> JoinHandle<()> {
    tokio::spawn(worker.run(symbols, stop))
}

impl StreamWorker {
    fn link(&self, state: ConnectorState) {
        let _ = self.control.send(ControlMsg::Link {
            provider: self.index,
            state,
        });
    }

    /// Sleep for `delay` unless stop fires first. Returns `false` on stop.
    async fn pause(stop: &mut StopSignal, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = stop.stopped() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    async fn run(self, mut symbols: watch::Receiver<Vec<Symbol>>, mut stop: StopSignal) {
        let key = self.source.key();
        let mut backoff = Backoff::new(self.config.current().stream.reconnect.clone());
        let mut sessions = 0u64;

        loop {
            // Idle until there is something to stream.
            let wanted = loop {
                let current = symbols.borrow_and_update().clone();
                if !current.is_empty() {
                    break current;
                }
                tokio::select! {
                    biased;
                    () = stop.stopped() => return,
                    changed = symbols.changed() => if changed.is_err() { return },
                }
            };

            backoff.reconfigure(self.config.current().stream.reconnect.clone());
            self.link(ConnectorState::Connecting);

            let credential = if self.source.requires_credential() {
                let Some(credential) = self.pool.select(key) else {
                    tracing::warn!(provider = %key, "no credentials configured for stream");
                    self.link(ConnectorState::Disconnected);
                    if !Self::pause(&mut stop, backoff.next_delay()).await {
                        return;
                    }
                    continue;
                };
                if let Some(wait) = credential.cooling_for() {
                    tracing::debug!(
                        provider = %key,
                        wait_ms = wait.as_millis() as u64,
                        "every credential cooling; waiting"
                    );
                    if !Self::pause(&mut stop, wait).await {
                        self.link(ConnectorState::Disconnected);
                        return;
                    }
                }
                Some(credential)
            } else {
                None
            };

            let opened = tokio::select! {
                biased;
                () = stop.stopped() => {
                    self.link(ConnectorState::Disconnected);
                    return;
                }
                opened = self.open(credential.as_ref(), &wanted) => opened,
            };
            let mut session = match opened {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(provider = %key, error = %e, "stream connect failed");
                    self.link(ConnectorState::Disconnected);
                    if !Self::pause(&mut stop, backoff.next_delay()).await {
                        return;
                    }
                    continue;
                }
            };

            sessions += 1;
            if sessions > 1 {
                self.metrics.inc_reconnects();
            }
            backoff.reset();
            tracing::info!(provider = %key, symbols = wanted.len(), "stream subscribed");
            self.link(ConnectorState::Subscribed);

            let end = self
                .pump(session.as_mut(), wanted.into_iter().collect(), &mut symbols, &mut stop)
                .await;
            session.close().await;
            self.link(ConnectorState::Disconnected);

            match end {
                SessionEnd::Stopped => return,
                SessionEnd::Idle => {
                    tracing::debug!(provider = %key, "no symbols left; stream idle");
                    continue;
                }
                SessionEnd::Closed => tracing::warn!(provider = %key, "stream closed by provider"),
                SessionEnd::Failed(e) => {
                    tracing::warn!(provider = %key, error = %e, "stream session failed");
                }
            }
            if !Self::pause(&mut stop, backoff.next_delay()).await {
                return;
            }
        }
    }

    /// Connect and subscribe `symbols`, folding the outcome into the credential pool.
    async fn open(
        &self,
        credential: Option<&Credential>,
        symbols: &[Symbol],
    ) -> Result<Box<dyn StreamSession>, EngineError> {
        let result = match self.source.connect(credential).await {
            Ok(mut session) => match session.subscribe(symbols).await {
                Ok(()) => Ok(session),
                Err(e) => {
                    session.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };
        if let Some(credential) = credential
            && let Some(outcome) = Outcome::of(&result)
        {
            self.pool.report(credential, outcome);
        }
        result
    }

    async fn pump(
        &self,
        session: &mut dyn StreamSession,
        mut subscribed: BTreeSet<Symbol>,
        symbols: &mut watch::Receiver<Vec<Symbol>>,
        stop: &mut StopSignal,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;
                () = stop.stopped() => return SessionEnd::Stopped,
                changed = symbols.changed() => {
                    if changed.is_err() {
                        return SessionEnd::Stopped;
                    }
                    let next: BTreeSet<Symbol> = symbols.borrow_and_update().iter().cloned().collect();
                    if next.is_empty() {
                        return SessionEnd::Idle;
                    }
                    if let Err(e) = Self::resubscribe(session, &subscribed, &next).await {
                        return SessionEnd::Failed(e);
                    }
                    subscribed = next;
                }
                msg = session.next_message() => match msg {
                    None => return SessionEnd::Closed,
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    Some(Ok(msg)) => self.dispatch(msg, &subscribed),
                },
            }
        }
    }

    async fn resubscribe(
        session: &mut dyn StreamSession,
        current: &BTreeSet<Symbol>,
        next: &BTreeSet<Symbol>,
    ) -> Result<(), EngineError> {
        let removed: Vec<Symbol> = current.difference(next).cloned().collect();
        let added: Vec<Symbol> = next.difference(current).cloned().collect();
        if !removed.is_empty() {
            session.unsubscribe(&removed).await?;
        }
        if !added.is_empty() {
            session.subscribe(&added).await?;
        }
        tracing::debug!(added = added.len(), removed = removed.len(), "stream symbols changed");
        Ok(())
    }

    fn dispatch(&self, msg: StreamMessage, subscribed: &BTreeSet<Symbol>) {
        match msg {
            StreamMessage::Ticks(ticks) => {
                let mut seen = Vec::with_capacity(ticks.len());
                for tick in ticks {
                    if !subscribed.contains(&tick.symbol) {
                        continue;
                    }
                    if !seen.contains(&tick.symbol) {
                        seen.push(tick.symbol.clone());
                    }
                    self.store.update(tick);
                }
                if !seen.is_empty() {
                    let _ = self.control.send(ControlMsg::Ticked {
                        provider: self.index,
                        symbols: seen,
                    });
                }
            }
            StreamMessage::Heartbeat => tracing::trace!(provider = %self.source.key(), "heartbeat"),
            StreamMessage::Rejected { symbol, reason } => {
                tracing::warn!(
                    provider = %self.source.key(),
                    symbol = %symbol,
                    reason = %reason,
                    "stream rejected symbol; polling it instead"
                );
                let _ = self.control.send(ControlMsg::Rejected {
                    provider: self.index,
                    symbol,
                });
            }
            StreamMessage::Malformed { detail } => {
                self.metrics.inc_malformed_ticks();
                tracing::debug!(provider = %self.source.key(), detail = %detail, "dropped malformed frame");
            }
            StreamMessage::ProviderError { msg } => {
                tracing::warn!(provider = %self.source.key(), msg = %msg, "stream provider error");
            }
        }
    }
}
