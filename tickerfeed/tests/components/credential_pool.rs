use std::sync::Arc;
use std::time::Duration;

use tickerfeed::{CredentialPool, EngineMetrics, EventBus, Outcome, Subscription};
use tickerfeed_core::{EngineError, EngineEvent, FailureKind, ProviderKey, SlotId};
use tickerfeed_types::{CooldownConfig, CredentialConfig};
use tokio::time::Instant;

const FINNHUB: ProviderKey = ProviderKey::new("finnhub");
const COINGECKO: ProviderKey = ProviderKey::new("coingecko");

fn creds(provider: &str, keys: &[&str]) -> Vec<CredentialConfig> {
    keys.iter()
        .map(|k| CredentialConfig {
            provider: provider.to_string(),
            api_key: (*k).to_string(),
        })
        .collect()
}

fn pool_with(keys: &[&str]) -> (CredentialPool, Subscription) {
    let bus = EventBus::new(256, Arc::new(EngineMetrics::default()));
    let sub = bus.subscribe();
    let pool = CredentialPool::new(CooldownConfig::default(), bus);
    pool.rebuild(
        &creds("finnhub", keys),
        &[FINNHUB, COINGECKO],
        CooldownConfig::default(),
    );
    (pool, sub)
}

fn rate_limited(retry_after: Option<Duration>) -> Outcome {
    Outcome::Failure(FailureKind::RateLimited { retry_after })
}

fn cooldowns(events: &[EngineEvent]) -> Vec<Duration> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::CredentialCooldown { cooldown, .. } => Some(*cooldown),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn keys_rotate_round_robin() {
    let (pool, _sub) = pool_with(&["a", "b", "c"]);
    let picked: Vec<String> = (0..5)
        .map(|_| pool.select(FINNHUB).unwrap().api_key().to_string())
        .collect();
    assert_eq!(picked, ["a", "b", "c", "a", "b"]);
    assert!(pool.select(COINGECKO).is_none());
    assert!(!pool.has_credentials(COINGECKO));
}

#[tokio::test(start_paused = true)]
async fn cooling_key_is_skipped() {
    let (pool, _sub) = pool_with(&["a", "b"]);
    let a = pool.select(FINNHUB).unwrap();
    pool.report(&a, rate_limited(None));
    for _ in 0..3 {
        let next = pool.select(FINNHUB).unwrap();
        assert_eq!(next.api_key(), "b");
        assert!(next.cooling_for().is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limit_cooldown_doubles_up_to_the_cap() {
    let (pool, mut sub) = pool_with(&["a"]);
    let a = pool.select(FINNHUB).unwrap();
    for _ in 0..4 {
        pool.report(&a, rate_limited(None));
    }
    assert_eq!(
        cooldowns(&sub.drain()),
        [60, 120, 240, 300].map(Duration::from_secs)
    );
    assert_eq!(pool.stats(FINNHUB)[0].consecutive_failures, 4);
}

#[tokio::test(start_paused = true)]
async fn retry_after_hint_sets_a_floor() {
    let (pool, mut sub) = pool_with(&["a"]);
    let a = pool.select(FINNHUB).unwrap();
    pool.report(&a, rate_limited(Some(Duration::from_secs(200))));
    pool.report(&a, Outcome::Failure(FailureKind::Transient));
    let cds = cooldowns(&sub.drain());
    assert_eq!(cds, [Duration::from_secs(200), Duration::from_secs(2)]);
    // A shorter failure never shortens an active cooldown.
    assert_eq!(
        pool.stats(FINNHUB)[0].cooling_for,
        Some(Duration::from_secs(200))
    );
}

#[tokio::test(start_paused = true)]
async fn all_keys_cooling_degrades_then_recovers() {
    let (pool, mut sub) = pool_with(&["a", "b"]);
    let a = pool.select(FINNHUB).unwrap();
    let b = pool.select(FINNHUB).unwrap();
    pool.report(&a, rate_limited(None));
    pool.report(&b, Outcome::Failure(FailureKind::Transient));

    let events = sub.drain();
    assert!(events.contains(&EngineEvent::ProviderDegraded {
        provider: FINNHUB,
        retry_in: Duration::from_secs(2),
    }));

    let best = pool.select(FINNHUB).unwrap();
    assert_eq!(best.api_key(), "b");
    assert_eq!(best.cooling_for(), Some(Duration::from_secs(2)));

    tokio::time::advance(Duration::from_secs(2)).await;
    let next = pool.select(FINNHUB).unwrap();
    assert_eq!(next.api_key(), "b");
    assert!(next.cooling_for().is_none());
    assert_eq!(
        sub.drain(),
        vec![
            EngineEvent::CredentialRestored {
                provider: FINNHUB,
                slot: b.slot(),
            },
            EngineEvent::ProviderRecovered { provider: FINNHUB },
        ]
    );

    tokio::time::advance(Duration::from_secs(58)).await;
    pool.refresh(Instant::now());
    assert_eq!(
        sub.drain(),
        vec![EngineEvent::CredentialRestored {
            provider: FINNHUB,
            slot: a.slot(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn success_clears_cooldown_and_resets_escalation() {
    let (pool, mut sub) = pool_with(&["a"]);
    let a = pool.select(FINNHUB).unwrap();
    pool.report(&a, rate_limited(None));
    pool.report(&a, rate_limited(None));
    sub.drain();

    pool.report(&a, Outcome::Success);
    let events = sub.drain();
    assert!(events.contains(&EngineEvent::CredentialRestored {
        provider: FINNHUB,
        slot: a.slot(),
    }));
    assert!(events.contains(&EngineEvent::ProviderRecovered { provider: FINNHUB }));

    pool.report(&a, rate_limited(None));
    assert_eq!(cooldowns(&sub.drain()), [Duration::from_secs(60)]);
}

#[tokio::test(start_paused = true)]
async fn rebuild_keeps_slots_for_unchanged_keys() {
    let (pool, _sub) = pool_with(&["a", "b"]);
    let ids = |pool: &CredentialPool| -> Vec<SlotId> {
        pool.stats(FINNHUB).iter().map(|s| s.slot).collect()
    };
    assert_eq!(ids(&pool), [SlotId(1), SlotId(2)]);

    let _a = pool.select(FINNHUB).unwrap();
    let b = pool.select(FINNHUB).unwrap();
    assert_eq!(b.api_key(), "b");
    pool.report(&b, Outcome::Failure(FailureKind::Auth));

    let mut next = creds("Finnhub", &["b", "c", "c", "  "]);
    next.extend(creds("polygon", &["z"]));
    pool.rebuild(&next, &[FINNHUB, COINGECKO], CooldownConfig::default());

    let stats = pool.stats(FINNHUB);
    assert_eq!(ids(&pool), [SlotId(2), SlotId(3)]);
    assert_eq!(stats[0].consecutive_failures, 1);
    assert_eq!(stats[0].cooling_for, Some(Duration::from_secs(60)));

    // Outcomes for a removed key are ignored.
    let (old_pool, _s) = pool_with(&["a"]);
    let stale = old_pool.select(FINNHUB).unwrap();
    pool.report(&stale, rate_limited(None));
    assert_eq!(pool.stats(FINNHUB)[1].failures, 0);

    pool.rebuild(&[], &[FINNHUB, COINGECKO], CooldownConfig::default());
    assert!(pool.select(FINNHUB).is_none());
}

#[tokio::test(start_paused = true)]
async fn counters_roll_over_a_window() {
    let (pool, _sub) = pool_with(&["a"]);
    let a = pool.select(FINNHUB).unwrap();
    for _ in 0..65 {
        pool.report(&a, Outcome::Success);
    }
    let stats = &pool.stats(FINNHUB)[0];
    assert_eq!(stats.successes, 32);
    assert_eq!(stats.failures, 0);
}

#[test]
fn outcome_classifies_provider_results() {
    let ok: Result<(), EngineError> = Ok(());
    assert_eq!(Outcome::of(&ok), Some(Outcome::Success));
    assert_eq!(
        Outcome::of::<()>(&Err(EngineError::rate_limited("finnhub", None))),
        Some(rate_limited(None))
    );
    assert_eq!(
        Outcome::of::<()>(&Err(EngineError::auth("finnhub", "bad key"))),
        Some(Outcome::Failure(FailureKind::Auth))
    );
    assert_eq!(
        Outcome::of::<()>(&Err(EngineError::transient("finnhub", "timeout"))),
        Some(Outcome::Failure(FailureKind::Transient))
    );
    assert_eq!(
        Outcome::of::<()>(&Err(EngineError::malformed("finnhub", "not json"))),
        None
    );
}

#[test]
fn degraded_and_recovered_alternate_under_concurrent_reports() {
    let bus = EventBus::new(1 << 16, Arc::new(EngineMetrics::default()));
    let mut sub = bus.subscribe();
    let pool = CredentialPool::new(CooldownConfig::default(), bus);
    pool.rebuild(&creds("finnhub", &["a", "b"]), &[FINNHUB], CooldownConfig::default());

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let pool = &pool;
            scope.spawn(move || {
                for i in 0..2_000 {
                    let Some(cred) = pool.select(FINNHUB) else {
                        continue;
                    };
                    let outcome = if (i + worker) % 3 == 0 {
                        Outcome::Success
                    } else {
                        rate_limited(None)
                    };
                    pool.report(&cred, outcome);
                }
            });
        }
    });

    let mut degraded = false;
    for event in sub.drain() {
        match event {
            EngineEvent::ProviderDegraded { .. } => {
                assert!(!degraded, "degraded twice in a row");
                degraded = true;
            }
            EngineEvent::ProviderRecovered { .. } => {
                assert!(degraded, "recovered without being degraded");
                degraded = false;
            }
            _ => {}
        }
    }
}
