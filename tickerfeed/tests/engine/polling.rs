use std::sync::Arc;
use std::time::Duration;

use tickerfeed::{ConnectorState, EngineError, EngineEvent};
use tickerfeed_core::AlwaysOpen;
use tickerfeed_mock::MockBehavior;
use tickerfeed_types::WatchedSymbol;

use crate::helpers::{
    Bell, Closed, REST, WS, build, config, dec, equities, eventually, harness, holiday_harness,
    polling_harness, settle, sym,
};

const SEVEN: [&str; 7] = ["AAPL", "AMZN", "GOOG", "META", "MSFT", "NVDA", "TSLA"];

fn strings(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(ToString::to_string).collect()
}

#[tokio::test(start_paused = true)]
async fn batches_honour_the_provider_limit() {
    let h = polling_harness(config(equities(&SEVEN)));
    h.engine.start().unwrap();

    let r = &h;
    eventually(move || async move { r.rest.call_count().await == 2 }).await;
    let mut requests = h.rest_requests().await;
    requests.sort_by_key(Vec::len);
    assert_eq!(requests, vec![strings(&SEVEN[5..]), strings(&SEVEN[..5])]);
}

#[tokio::test(start_paused = true)]
async fn batches_run_with_bounded_concurrency_and_rotate_keys() {
    let mut cfg = config(equities(&SEVEN));
    cfg.poll.batch_size = 2;
    cfg.poll.max_concurrent_batches = 2;
    let h = polling_harness(cfg);
    h.rest.set_latency(Duration::from_secs(1)).await;
    h.engine.start().unwrap();

    let r = &h;
    eventually(move || async move { r.rest.call_count().await == 4 }).await;
    settle().await;
    assert_eq!(h.rest.peak_in_flight().await, 2);

    let keys: Vec<Option<String>> = h.rest.calls().await.into_iter().map(|c| c.api_key).collect();
    let count = |k: &str| keys.iter().filter(|x| x.as_deref() == Some(k)).count();
    assert_eq!((count("r1"), count("r2")), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_batch_retries_with_the_next_key() {
    let mut h = polling_harness(config(equities(&["AAPL", "MSFT"])));
    h.rest.set_price(&sym("AAPL"), dec(100)).await;
    h.rest.set_price(&sym("MSFT"), dec(200)).await;
    h.rest
        .fail_next_batch(EngineError::rate_limited("rest", None))
        .await;
    h.engine.start().unwrap();

    let cooled = h
        .wait_for(|e| matches!(e, EngineEvent::CredentialCooldown { provider, .. } if *provider == REST))
        .await;
    assert!(matches!(
        cooled,
        EngineEvent::CredentialCooldown { cooldown, .. } if cooldown == Duration::from_secs(60)
    ));

    let r = &h;
    eventually(move || async move {
        r.engine.quote(&sym("AAPL")).and_then(|q| q.price) == Some(dec(100))
    })
    .await;
    let keys: Vec<Option<String>> = h.rest.calls().await.into_iter().map(|c| c.api_key).collect();
    assert_eq!(keys, [Some("r1".to_string()), Some("r2".to_string())]);
    assert_eq!(h.engine.metrics().poll_batch_failures, 1);

    let stats = h.engine.credential_stats(REST);
    assert!(stats[0].cooling_for.is_some());
    assert_eq!(stats[1].successes, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_keys_degrade_the_provider_and_give_up() {
    let mut h = polling_harness(config(equities(&["AAPL"])));
    for key in ["r1", "r2"] {
        h.rest
            .set_key_behavior(
                key,
                MockBehavior::Fail(EngineError::rate_limited("rest", None)),
            )
            .await;
    }
    h.engine.start().unwrap();

    let degraded = h
        .wait_for(|e| matches!(e, EngineEvent::ProviderDegraded { .. }))
        .await;
    assert!(matches!(degraded, EngineEvent::ProviderDegraded { provider, .. } if provider == REST));

    // The third attempt waits out the shortest cooldown instead of failing fast.
    let third = h
        .wait_for(|e| matches!(e, EngineEvent::CredentialCooldown { .. }))
        .await;
    assert!(matches!(
        third,
        EngineEvent::CredentialCooldown { cooldown, .. } if cooldown == Duration::from_secs(120)
    ));
    settle().await;
    assert_eq!(h.rest.call_count().await, 3);
    assert_eq!(h.engine.metrics().poll_batch_failures, 3);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.rest.call_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn off_hours_stretch_only_market_bound_symbols() {
    let mut cfg = config(vec![WatchedSymbol::equity("AAPL"), WatchedSymbol::crypto("BTC")]);
    cfg.poll.interval_ms = 60_000;
    cfg.poll.off_hours_interval_ms = 600_000;
    let h = build(cfg, false, Arc::new(Closed));
    h.engine.start().unwrap();

    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(h.rest.call_count().await, 1);
    assert_eq!(h.coins.call_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn regular_interval_while_the_market_is_open() {
    let mut cfg = config(equities(&["AAPL"]));
    cfg.poll.interval_ms = 60_000;
    cfg.poll.off_hours_interval_ms = 600_000;
    let h = build(cfg, false, Arc::new(AlwaysOpen));
    h.engine.start().unwrap();

    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(h.rest.call_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn opening_bell_cuts_the_off_hours_wait_short() {
    let mut cfg = config(equities(&["AAPL"]));
    cfg.poll.interval_ms = 60_000;
    cfg.poll.off_hours_interval_ms = 600_000;
    let bell = Bell::default();
    let h = build(cfg, false, Arc::new(bell.clone()));
    h.engine.start().unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.rest.call_count().await, 1);

    bell.open();
    tokio::time::sleep(Duration::from_secs(200)).await;
    // Cycles at 60s, 120s and 180s instead of waiting until 600s.
    assert_eq!(h.rest.call_count().await, 4);
}

#[tokio::test(start_paused = true)]
async fn reloaded_holidays_reach_the_running_poller() {
    let mut cfg = config(equities(&["AAPL"]));
    cfg.poll.interval_ms = 60_000;
    cfg.poll.off_hours_interval_ms = 600_000;
    let h = holiday_harness(cfg.clone());
    h.engine.start().unwrap();

    let r = &h;
    eventually(move || async move { r.rest.call_count().await == 1 }).await;

    // New York's date is today or yesterday in UTC; closing both shuts the market.
    let today = chrono::Utc::now().date_naive();
    cfg.market_holidays = [today, today - chrono::Days::new(1)]
        .iter()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect();
    h.reconfigure(cfg);

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(h.rest.call_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn released_symbols_drop_out_of_a_retrying_batch() {
    let mut cfg = config(equities(&["AAPL", "MSFT"]));
    cfg.poll.batch_retry.min_backoff_ms = 10_000;
    let h = polling_harness(cfg.clone());
    h.rest.set_price(&sym("AAPL"), dec(100)).await;
    h.rest.set_price(&sym("MSFT"), dec(200)).await;
    h.rest
        .fail_next_batch(EngineError::rate_limited("rest", None))
        .await;
    h.engine.start().unwrap();

    let r = &h;
    eventually(move || async move { r.rest.call_count().await == 1 }).await;
    cfg.watchlist = equities(&["AAPL"]);
    h.reconfigure(cfg);

    eventually(move || async move {
        r.engine.quote(&sym("AAPL")).and_then(|q| q.price) == Some(dec(100))
    })
    .await;
    assert_eq!(
        h.rest_requests().await,
        vec![strings(&["AAPL", "MSFT"]), strings(&["AAPL"])]
    );
}

#[tokio::test(start_paused = true)]
async fn new_symbols_are_polled_while_another_batch_backs_off() {
    let mut cfg = config(equities(&["AAPL"]));
    cfg.poll.batch_retry.min_backoff_ms = 100_000;
    cfg.poll.batch_retry.max_backoff_ms = 100_000;
    let h = polling_harness(cfg.clone());
    h.rest.set_price(&sym("AAPL"), dec(100)).await;
    h.rest.set_price(&sym("MSFT"), dec(200)).await;
    h.rest
        .fail_next_batch(EngineError::rate_limited("rest", None))
        .await;
    h.engine.start().unwrap();

    let r = &h;
    eventually(move || async move { r.rest.call_count().await == 1 }).await;
    cfg.watchlist = equities(&["AAPL", "MSFT"]);
    h.reconfigure(cfg);

    eventually(move || async move {
        r.engine.quote(&sym("MSFT")).and_then(|q| q.price) == Some(dec(200))
    })
    .await;
    // AAPL still waits out its backoff; its pending retry is not duplicated.
    assert_eq!(h.engine.quote(&sym("AAPL")).and_then(|q| q.price), None);
    assert_eq!(
        h.rest_requests().await,
        vec![strings(&["AAPL"]), strings(&["MSFT"])]
    );
}

#[tokio::test(start_paused = true)]
async fn significant_move_is_announced_once_per_close() {
    let mut h = polling_harness(config(equities(&["AAPL"])));
    h.rest.set_previous_close(&sym("AAPL"), dec(100)).await;
    h.rest.set_price(&sym("AAPL"), dec(110)).await;
    h.engine.start().unwrap();

    let moved = h
        .wait_for(|e| matches!(e, EngineEvent::SignificantMove { .. }))
        .await;
    assert_eq!(
        moved,
        EngineEvent::SignificantMove {
            symbol: sym("AAPL"),
            price: dec(110),
            previous_close: dec(100),
            change_percent: dec(10),
        }
    );

    h.rest.set_price(&sym("AAPL"), dec(112)).await;
    tokio::time::sleep(h.engine.config().poll.interval() + Duration::from_secs(1)).await;
    let later = h.events.drain();
    assert!(later.iter().any(|e| matches!(e, EngineEvent::QuoteUpdated(_))));
    assert!(!later.iter().any(|e| matches!(e, EngineEvent::SignificantMove { .. })));
    assert_eq!(
        h.engine.quote(&sym("AAPL")).unwrap().change_percent,
        Some(dec(12))
    );
}

#[tokio::test(start_paused = true)]
async fn disabled_streaming_polls_everything() {
    let mut cfg = config(equities(&["AAPL", "MSFT"]));
    cfg.stream.enabled = false;
    let h = harness(cfg);
    h.engine.start().unwrap();

    let r = &h;
    eventually(move || async move { r.rest.call_count().await == 1 }).await;
    assert_eq!(h.rest_requests().await, vec![strings(&["AAPL", "MSFT"])]);
    assert_eq!(h.stream.connect_count().await, 0);
    assert_eq!(h.engine.connector_state(WS), Some(ConnectorState::Disconnected));
}
