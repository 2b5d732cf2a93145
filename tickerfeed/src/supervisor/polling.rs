use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tickerfeed_cache::ConfigCache;
use tickerfeed_core::{Instrument, QuoteBatch, QuoteSource, StopSignal, Symbol, TradingCalendar};
use tickerfeed_types::PollConfig;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use super::backoff::Backoff;
use crate::credentials::{CredentialPool, Outcome};
use crate::metrics::EngineMetrics;
use crate::quotes::QuoteStore;

/// Instructions from the supervisor to a polling worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollCommand {
    /// Add symbols to the active set and poll right away.
    Assign(Vec<Instrument>),
    /// Drop symbols from the active set.
    Release(Vec<Symbol>),
    /// Fetch these once without adding them to the active set.
    Prime(Vec<Instrument>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    /// Scheduled pass over the active set. Results for released symbols are dropped.
    Cycle,
    /// One-off fetch ahead of a hand-over.
    Prime,
}

pub struct PollWorker {
    pub source: Arc<dyn QuoteSource>,
    pub pool: Arc<CredentialPool>,
    pub store: Arc<QuoteStore>,
    pub metrics: Arc<EngineMetrics>,
    pub config: Arc<ConfigCache>,
    pub calendar: Arc<dyn TradingCalendar>,
}

pub fn spawn_poll_worker(
    worker: PollWorker,
    commands: mpsc::UnboundedReceiver<PollCommand>,
    stop: StopSignal,
) -> JoinHandle<()> {
    let poller = Arc::new(Poller {
        worker,
        active: Mutex::new(BTreeMap::new()),
        in_flight: Mutex::new(HashSet::new()),
    });
    tokio::spawn(poller.run(commands, stop))
}

/// Worker state shared with its batch tasks.
struct Poller {
    worker: PollWorker,
    active: Mutex<BTreeMap<Symbol, Instrument>>,
    /// Symbols with a batch still running, retries included.
    in_flight: Mutex<HashSet<Symbol>>,
}

/// Releases a batch's symbols from `in_flight` when the batch task ends.
struct Claim {
    poller: Arc<Poller>,
    symbols: Vec<Symbol>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut in_flight = self.poller.in_flight();
        for symbol in &self.symbols {
            in_flight.remove(symbol);
        }
    }
}

impl Poller {
    async fn run(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<PollCommand>,
        mut stop: StopSignal,
    ) {
        // Dropping the set on return aborts every batch still running.
        let mut batches = JoinSet::new();
        let mut semaphore = None;
        let mut last_cycle: Option<Instant> = None;
        let mut wake: Option<Instant> = None;

        loop {
            let due = wake.filter(|_| !self.active().is_empty());
            tokio::select! {
                biased;
                () = stop.stopped() => return,
                cmd = commands.recv() => match cmd {
                    None => return,
                    Some(PollCommand::Assign(list)) => {
                        if self.assign(list) {
                            last_cycle = None;
                            wake = Some(Instant::now());
                        }
                    }
                    Some(PollCommand::Release(list)) => self.release(&list),
                    Some(PollCommand::Prime(list)) => {
                        let permits = self.permits(&mut semaphore);
                        self.spawn_batches(&mut batches, list, BatchKind::Prime, &permits);
                    }
                },
                Some(joined) = batches.join_next(), if !batches.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(provider = %self.worker.source.key(), "poll batch panicked");
                        }
                    }
                }
                () = tokio::time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    let now = Instant::now();
                    let regular = self.worker.config.current().poll.interval();
                    let wait = self.interval();
                    // While the market is shut the worker still wakes at the regular
                    // interval, so an opening bell shortens the off-hours wait.
                    match last_cycle {
                        Some(at) if now < at + wait => {
                            wake = Some((at + wait).min(now + regular));
                        }
                        _ => {
                            let list: Vec<Instrument> = self.active().values().cloned().collect();
                            let permits = self.permits(&mut semaphore);
                            self.spawn_batches(&mut batches, list, BatchKind::Cycle, &permits);
                            last_cycle = Some(now);
                            wake = Some(now + wait.min(regular));
                            tracing::trace!(
                                provider = %self.worker.source.key(),
                                wait_ms = wait.as_millis() as u64,
                                "next poll cycle scheduled"
                            );
                        }
                    }
                }
            }
        }
    }

    fn active(&self) -> MutexGuard<'_, BTreeMap<Symbol, Instrument>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<Symbol>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` when at least one symbol was new.
    fn assign(&self, list: Vec<Instrument>) -> bool {
        let mut active = self.active();
        let mut added = false;
        for inst in list {
            added |= active.insert(inst.symbol().clone(), inst).is_none();
        }
        added
    }

    fn release(&self, list: &[Symbol]) {
        let mut active = self.active();
        for sym in list {
            active.remove(sym);
        }
    }

    /// Regular or off-hours interval, re-read from the current configuration.
    fn interval(&self) -> Duration {
        let cfg = self.worker.config.current();
        let follows_market = self
            .active()
            .values()
            .any(|i| i.kind().follows_market_hours());
        if follows_market && !self.worker.calendar.is_market_open(Utc::now()) {
            cfg.poll.off_hours_interval()
        } else {
            cfg.poll.interval()
        }
    }

    /// Batch permits, replaced when `max_concurrent_batches` changes.
    fn permits(&self, current: &mut Option<(usize, Arc<Semaphore>)>) -> Arc<Semaphore> {
        let limit = self.worker.config.current().poll.max_concurrent_batches.max(1);
        if let Some((n, permits)) = current.as_ref() {
            if *n == limit {
                return Arc::clone(permits);
            }
        }
        let permits = Arc::new(Semaphore::new(limit));
        *current = Some((limit, Arc::clone(&permits)));
        permits
    }

    /// Split `instruments` into batches and run each as its own task.
    ///
    /// Symbols whose previous batch has not finished are left out.
    fn spawn_batches(
        self: &Arc<Self>,
        batches: &mut JoinSet<()>,
        mut instruments: Vec<Instrument>,
        kind: BatchKind,
        permits: &Arc<Semaphore>,
    ) {
        {
            let mut in_flight = self.in_flight();
            let before = instruments.len();
            instruments.retain(|i| !in_flight.contains(i.symbol()));
            if instruments.len() < before {
                tracing::debug!(
                    provider = %self.worker.source.key(),
                    skipped = before - instruments.len(),
                    "previous batch still running"
                );
            }
            in_flight.extend(instruments.iter().map(|i| i.symbol().clone()));
        }
        if instruments.is_empty() {
            return;
        }

        let cfg = self.worker.config.current();
        let size = self.worker.source.max_batch_size().min(cfg.poll.batch_size).max(1);
        tracing::debug!(
            provider = %self.worker.source.key(),
            symbols = instruments.len(),
            batch_size = size,
            ?kind,
            "polling"
        );
        for chunk in instruments.chunks(size) {
            let claim = Claim {
                poller: Arc::clone(self),
                symbols: chunk.iter().map(|i| i.symbol().clone()).collect(),
            };
            let pending = chunk.to_vec();
            let permits = Arc::clone(permits);
            let poll = cfg.poll.clone();
            batches.spawn(async move {
                claim.poller.fetch_batch(pending, &permits, &poll, kind).await;
                drop(claim);
            });
        }
    }

    /// Drop entries for symbols released since the batch started.
    fn retain_wanted<T>(&self, kind: BatchKind, items: &mut Vec<T>, symbol: impl Fn(&T) -> &Symbol) {
        if kind == BatchKind::Prime {
            return;
        }
        let active = self.active();
        items.retain(|item| active.contains_key(symbol(item)));
    }

    async fn fetch_batch(
        &self,
        mut pending: Vec<Instrument>,
        permits: &Semaphore,
        poll: &PollConfig,
        kind: BatchKind,
    ) {
        let PollWorker {
            source,
            pool,
            store,
            metrics,
            ..
        } = &self.worker;
        let key = source.key();
        let max_attempts = poll.max_batch_attempts.max(1);
        let mut backoff = Backoff::new(poll.batch_retry.clone());

        for attempt in 1..=max_attempts {
            let credential = if source.requires_credential() {
                let Some(credential) = pool.select(key) else {
                    tracing::warn!(provider = %key, "no credentials configured; skipping batch");
                    metrics.inc_poll_batch_failures();
                    return;
                };
                if let Some(wait) = credential.cooling_for() {
                    tokio::time::sleep(wait).await;
                }
                Some(credential)
            } else {
                None
            };

            self.retain_wanted(kind, &mut pending, |i| i.symbol());
            if pending.is_empty() {
                tracing::debug!(provider = %key, attempt, "batch symbols released; dropping batch");
                return;
            }

            let result = {
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                source.fetch_quotes(&pending, credential.as_ref()).await
            };

            if let Some(credential) = &credential {
                let outcome = match &result {
                    Ok(QuoteBatch {
                        failure: Some(e), ..
                    }) => e.failure_kind().map(Outcome::Failure),
                    other => Outcome::of(other),
                };
                if let Some(outcome) = outcome {
                    pool.report(credential, outcome);
                }
            }

            let error = match result {
                Ok(mut batch) => {
                    if !batch.missing.is_empty() {
                        tracing::debug!(
                            provider = %key,
                            missing = ?batch.missing,
                            "provider returned no quote for some symbols"
                        );
                    }
                    self.retain_wanted(kind, &mut batch.ticks, |t| &t.symbol);
                    for tick in batch.ticks {
                        store.update(tick);
                    }
                    let Some(error) = batch.failure else {
                        return;
                    };
                    let missing: HashSet<Symbol> = batch.missing.into_iter().collect();
                    pending.retain(|i| missing.contains(i.symbol()));
                    error
                }
                Err(e) => e,
            };

            metrics.inc_poll_batch_failures();
            if !error.is_retryable() || attempt == max_attempts || pending.is_empty() {
                tracing::warn!(
                    provider = %key,
                    attempt,
                    error = %error,
                    symbols = pending.len(),
                    "poll batch failed"
                );
                return;
            }
            let delay = backoff.next_delay();
            tracing::debug!(
                provider = %key,
                attempt,
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "poll batch failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for PollWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollWorker")
            .field("provider", &self.source.key())
            .finish_non_exhaustive()
    }
}
