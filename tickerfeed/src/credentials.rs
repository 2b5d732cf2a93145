//! Rotation and cooldown of API keys.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tickerfeed_core::{Credential, EngineError, EngineEvent, FailureKind, ProviderKey, SlotId};
use tickerfeed_types::{CooldownConfig, CredentialConfig};
use tokio::time::Instant;

use crate::bus::EventBus;

/// Outcomes folded into the rolling counters before they are halved.
const OUTCOME_WINDOW: u32 = 64;

/// Result of a request made with a pooled credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The provider accepted the key.
    Success,
    /// The request failed in a way attributable to the key or the provider.
    Failure(FailureKind),
}

impl Outcome {
    /// Classify a provider call. Errors that say nothing about the key yield `None`.
    pub fn of<T>(result: &Result<T, EngineError>) -> Option<Self> {
        match result {
            Ok(_) => Some(Self::Success),
            Err(e) => e.failure_kind().map(Self::Failure),
        }
    }
}

/// Read-only view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStats {
    /// Slot identifier, stable across rebuilds while the key is configured.
    pub slot: SlotId,
    /// Remaining cooldown, if any.
    pub cooling_for: Option<Duration>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Rolling success count.
    pub successes: u32,
    /// Rolling failure count.
    pub failures: u32,
}

struct Slot {
    id: SlotId,
    key: Arc<str>,
    cooldown_until: Option<Instant>,
    consecutive: u32,
    successes: u32,
    failures: u32,
}

impl Slot {
    fn new(id: SlotId, key: Arc<str>) -> Self {
        Self {
            id,
            key,
            cooldown_until: None,
            consecutive: 0,
            successes: 0,
            failures: 0,
        }
    }

    fn is_cooling(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    fn roll(&mut self) {
        if self.successes + self.failures > OUTCOME_WINDOW {
            self.successes /= 2;
            self.failures /= 2;
        }
    }

    /// Success ratio scaled to parts per thousand; untried keys count as perfect.
    fn ratio(&self) -> u32 {
        let total = self.successes + self.failures;
        if total == 0 {
            1000
        } else {
            self.successes * 1000 / total
        }
    }
}

struct ProviderSlots {
    slots: Vec<Slot>,
    cursor: usize,
    degraded: bool,
}

impl ProviderSlots {
    /// Clear expired cooldowns, then recompute the degraded flag.
    fn refresh(&mut self, provider: ProviderKey, now: Instant, events: &mut Vec<EngineEvent>) {
        for slot in &mut self.slots {
            if slot.cooldown_until.is_some_and(|until| until <= now) {
                slot.cooldown_until = None;
                tracing::debug!(provider = %provider, slot = slot.id.0, "credential cooldown expired");
                events.push(EngineEvent::CredentialRestored {
                    provider,
                    slot: slot.id,
                });
            }
        }
        self.update_degraded(provider, now, events);
    }

    fn update_degraded(&mut self, provider: ProviderKey, now: Instant, events: &mut Vec<EngineEvent>) {
        let all_cooling = !self.slots.is_empty() && self.slots.iter().all(|s| s.is_cooling(now));
        if all_cooling && !self.degraded {
            self.degraded = true;
            let retry_in = self
                .slots
                .iter()
                .filter_map(|s| s.cooldown_until)
                .min()
                .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
            tracing::warn!(
                provider = %provider,
                retry_in_ms = retry_in.as_millis() as u64,
                "every credential is cooling down"
            );
            events.push(EngineEvent::ProviderDegraded { provider, retry_in });
        } else if !all_cooling && self.degraded {
            self.degraded = false;
            tracing::info!(provider = %provider, "credential available again");
            events.push(EngineEvent::ProviderRecovered { provider });
        }
    }
}

struct PoolState {
    providers: HashMap<ProviderKey, ProviderSlots>,
    cooldown: CooldownConfig,
    next_id: u64,
}

impl PoolState {
    fn cooldown_for(&self, kind: FailureKind, consecutive: u32) -> Duration {
        let cfg = &self.cooldown;
        let max = Duration::from_millis(cfg.max_cooldown_ms);
        match kind {
            FailureKind::Transient => Duration::from_millis(cfg.transient_backoff_ms).min(max),
            FailureKind::RateLimited { retry_after } => {
                escalate(cfg.rate_limit_cooldown_ms, consecutive)
                    .max(retry_after.unwrap_or_default())
                    .min(max)
            }
            FailureKind::Auth => escalate(cfg.rate_limit_cooldown_ms, consecutive).min(max),
        }
    }
}

/// `base * 2^(consecutive - 1)`, saturating.
fn escalate(base_ms: u64, consecutive: u32) -> Duration {
    let exp = consecutive.saturating_sub(1).min(63);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exp))
}

/// Per-provider pool of API keys.
///
/// Keys are handed out round-robin among those not cooling down. When every key of a
/// provider is cooling the one that recovers first is returned with its remaining
/// cooldown so the caller can wait. Keys are never disabled permanently.
pub struct CredentialPool {
    state: Mutex<PoolState>,
    bus: EventBus,
}

impl CredentialPool {
    /// Empty pool; populate it with [`CredentialPool::rebuild`].
    pub fn new(cooldown: CooldownConfig, bus: EventBus) -> Self {
        Self {
            state: Mutex::new(PoolState {
                providers: HashMap::new(),
                cooldown,
                next_id: 0,
            }),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the configured keys.
    ///
    /// Keys present before and after keep their slot, counters and cooldown.
    /// Entries naming a provider outside `known` are ignored with a warning.
    pub fn rebuild(
        &self,
        credentials: &[CredentialConfig],
        known: &[ProviderKey],
        cooldown: CooldownConfig,
    ) {
        let mut state = self.lock();
        state.cooldown = cooldown;

        for c in credentials {
            if !known.iter().any(|k| k.matches(&c.provider)) {
                tracing::warn!(provider = %c.provider, "credential for unknown provider ignored");
            }
        }

        let mut providers = HashMap::new();
        for &provider in known {
            if providers.contains_key(&provider) {
                continue;
            }
            let mut old = state
                .providers
                .remove(&provider)
                .map(|p| p.slots)
                .unwrap_or_default();
            let mut seen = HashSet::new();
            let mut slots = Vec::new();
            for c in credentials.iter().filter(|c| provider.matches(&c.provider)) {
                let key = c.api_key.trim();
                if key.is_empty() || !seen.insert(key.to_string()) {
                    continue;
                }
                let slot = match old.iter().position(|s| &*s.key == key) {
                    Some(i) => old.swap_remove(i),
                    None => {
                        state.next_id += 1;
                        Slot::new(SlotId(state.next_id), Arc::from(key))
                    }
                };
                slots.push(slot);
            }
            if !slots.is_empty() {
                tracing::debug!(provider = %provider, keys = slots.len(), "credential pool rebuilt");
                providers.insert(
                    provider,
                    ProviderSlots {
                        slots,
                        cursor: 0,
                        degraded: false,
                    },
                );
            }
        }
        state.providers = providers;
    }

    /// Next credential for `provider`, or `None` when it has no keys.
    ///
    /// The returned credential carries `cooling_for` when every key is cooling.
    pub fn select(&self, provider: ProviderKey) -> Option<Credential> {
        let now = Instant::now();
        let mut events = Vec::new();
        let picked = {
            let mut state = self.lock();
            let entry = state.providers.get_mut(&provider)?;
            entry.refresh(provider, now, &mut events);

            let n = entry.slots.len();
            let eligible = (0..n)
                .map(|off| (entry.cursor + off) % n)
                .find(|&i| !entry.slots[i].is_cooling(now));
            let picked = match eligible {
                Some(i) => {
                    entry.cursor = (i + 1) % n;
                    let slot = &entry.slots[i];
                    Credential::new(provider, slot.id, Arc::clone(&slot.key), None)
                }
                None => {
                    let slot = entry
                        .slots
                        .iter()
                        .min_by(|a, b| {
                            a.cooldown_until
                                .cmp(&b.cooldown_until)
                                .then_with(|| b.ratio().cmp(&a.ratio()))
                        })?;
                    let wait = slot
                        .cooldown_until
                        .map(|until| until.saturating_duration_since(now));
                    Credential::new(provider, slot.id, Arc::clone(&slot.key), wait)
                }
            };
            self.bus.publish_all(events);
            picked
        };
        Some(picked)
    }

    /// Fold the outcome of a request made with `credential` into its slot.
    ///
    /// Reports for keys removed by a rebuild are ignored.
    pub fn report(&self, credential: &Credential, outcome: Outcome) {
        let now = Instant::now();
        let provider = credential.provider();
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let cooldown_for = match outcome {
                Outcome::Success => None,
                Outcome::Failure(kind) => {
                    let consecutive = state
                        .providers
                        .get(&provider)
                        .and_then(|p| p.slots.iter().find(|s| s.id == credential.slot()))
                        .map_or(1, |s| s.consecutive.saturating_add(1));
                    Some(state.cooldown_for(kind, consecutive))
                }
            };
            let Some(entry) = state.providers.get_mut(&provider) else {
                return;
            };
            let Some(slot) = entry.slots.iter_mut().find(|s| s.id == credential.slot()) else {
                return;
            };

            match cooldown_for {
                None => {
                    slot.consecutive = 0;
                    slot.successes = slot.successes.saturating_add(1);
                    slot.roll();
                    if slot.cooldown_until.take().is_some() {
                        events.push(EngineEvent::CredentialRestored {
                            provider,
                            slot: slot.id,
                        });
                    }
                }
                Some(cooldown) => {
                    slot.consecutive = slot.consecutive.saturating_add(1);
                    slot.failures = slot.failures.saturating_add(1);
                    slot.roll();
                    let until = now + cooldown;
                    slot.cooldown_until = Some(slot.cooldown_until.map_or(until, |u| u.max(until)));
                    tracing::warn!(
                        provider = %provider,
                        slot = slot.id.0,
                        consecutive = slot.consecutive,
                        cooldown_ms = cooldown.as_millis() as u64,
                        "credential cooling down"
                    );
                    events.push(EngineEvent::CredentialCooldown {
                        provider,
                        slot: slot.id,
                        cooldown,
                    });
                }
            }
            entry.update_degraded(provider, now, &mut events);
            self.bus.publish_all(events);
        }
    }

    /// Restore every key whose cooldown has elapsed.
    pub fn refresh(&self, now: Instant) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            for (&provider, entry) in &mut state.providers {
                entry.refresh(provider, now, &mut events);
            }
            self.bus.publish_all(events);
        }
    }

    /// Whether any key is configured for `provider`.
    #[must_use]
    pub fn has_credentials(&self, provider: ProviderKey) -> bool {
        self.lock().providers.contains_key(&provider)
    }

    /// Per-slot counters for `provider`, in rotation order.
    #[must_use]
    pub fn stats(&self, provider: ProviderKey) -> Vec<SlotStats> {
        let now = Instant::now();
        self.lock()
            .providers
            .get(&provider)
            .map(|p| {
                p.slots
                    .iter()
                    .map(|s| SlotStats {
                        slot: s.id,
                        cooling_for: s
                            .cooldown_until
                            .filter(|&until| until > now)
                            .map(|until| until - now),
                        consecutive_failures: s.consecutive,
                        successes: s.successes,
                        failures: s.failures,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("providers", &self.lock().providers.len())
            .finish_non_exhaustive()
    }
}
