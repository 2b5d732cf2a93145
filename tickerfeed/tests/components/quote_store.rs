use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tickerfeed::{EngineEvent, EngineMetrics, EventBus, QuoteStore, Subscription};
use tickerfeed_core::{EngineConfig, Instrument, QuoteTick, Staleness, Symbol};
use tickerfeed_mock::mock_ts;
use tokio::time::Instant;

fn store_with(config: EngineConfig) -> (QuoteStore, Subscription, Arc<EngineMetrics>) {
    let metrics = Arc::new(EngineMetrics::default());
    let bus = EventBus::new(64, Arc::clone(&metrics));
    let sub = bus.subscribe();
    let store = QuoteStore::new(&config, bus, Arc::clone(&metrics));
    (store, sub, metrics)
}

fn store() -> (QuoteStore, Subscription, Arc<EngineMetrics>) {
    store_with(EngineConfig::default())
}

fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

fn tick(s: &str, price: i64, seq: i64) -> QuoteTick {
    QuoteTick::new(sym(s), Decimal::from(price), mock_ts(seq))
}

#[test]
fn unwatched_and_priceless_ticks_are_ignored() {
    let (store, mut sub, _) = store();
    assert!(!store.update(tick("AAPL", 100, 1)));

    store.watch(Instrument::equity("AAPL").unwrap());
    let mut no_price = tick("AAPL", 100, 1);
    no_price.price = None;
    assert!(!store.update(no_price));
    assert!(sub.drain().is_empty());
    assert_eq!(store.get(&sym("AAPL")).unwrap().staleness, Staleness::Unknown);
}

#[test]
fn first_tick_publishes_quote_and_freshness() {
    let (store, mut sub, _) = store();
    store.watch(Instrument::equity("AAPL").unwrap());
    assert!(store.update(tick("AAPL", 100, 1)));

    let events = sub.drain();
    assert_eq!(events.len(), 2);
    let EngineEvent::QuoteUpdated(q) = &events[0] else {
        panic!("expected quote update, got {:?}", events[0]);
    };
    assert_eq!(q.price, Some(Decimal::from(100)));
    assert_eq!(q.staleness, Staleness::Fresh);
    assert_eq!(
        events[1],
        EngineEvent::StalenessChanged {
            symbol: sym("AAPL"),
            from: Staleness::Unknown,
            to: Staleness::Fresh,
        }
    );
}

#[test]
fn older_or_equal_timestamps_are_rejected_and_counted() {
    let (store, mut sub, metrics) = store();
    store.watch(Instrument::equity("AAPL").unwrap());
    assert!(store.update(tick("AAPL", 100, 5)));
    sub.drain();

    assert!(!store.update(tick("AAPL", 101, 5)));
    assert!(!store.update(tick("AAPL", 99, 4)));
    assert!(sub.drain().is_empty());
    assert_eq!(store.get(&sym("AAPL")).unwrap().price, Some(Decimal::from(100)));
    assert_eq!(metrics.snapshot().rejected_updates, 2);

    assert!(store.update(tick("AAPL", 102, 6)));
    let q = store.get(&sym("AAPL")).unwrap();
    assert_eq!(q.previous_price, Some(Decimal::from(100)));
    assert_eq!(q.source_ts, Some(mock_ts(6)));
}

#[test]
fn change_percent_prefers_previous_close() {
    let (store, _sub, _) = store();
    store.watch(Instrument::equity("AAPL").unwrap());

    store.update(tick("AAPL", 100, 1));
    assert_eq!(store.get(&sym("AAPL")).unwrap().change_percent, None);

    store.update(tick("AAPL", 110, 2));
    assert_eq!(
        store.get(&sym("AAPL")).unwrap().change_percent,
        Some(Decimal::from(10))
    );

    store.update(tick("AAPL", 102, 3).with_previous_close(Decimal::from(100)));
    let q = store.get(&sym("AAPL")).unwrap();
    assert_eq!(q.previous_close, Some(Decimal::from(100)));
    assert_eq!(q.change_percent, Some(Decimal::from(2)));

    // The close sticks when later ticks omit it.
    store.update(tick("AAPL", 97, 4));
    assert_eq!(
        store.get(&sym("AAPL")).unwrap().change_percent,
        Some(Decimal::from(-3))
    );
}

fn moves(events: &[EngineEvent]) -> Vec<Decimal> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::SignificantMove { change_percent, .. } => Some(*change_percent),
            _ => None,
        })
        .collect()
}

#[test]
fn significant_move_fires_once_per_previous_close() {
    let (store, mut sub, _) = store();
    store.watch(Instrument::equity("TSLA").unwrap());
    let close = Decimal::from(200);

    store.update(tick("TSLA", 204, 1).with_previous_close(close));
    assert!(moves(&sub.drain()).is_empty());

    store.update(tick("TSLA", 212, 2).with_previous_close(close));
    assert_eq!(moves(&sub.drain()), vec![Decimal::from(6)]);

    store.update(tick("TSLA", 220, 3).with_previous_close(close));
    assert!(moves(&sub.drain()).is_empty());

    // A new trading day re-arms the notification.
    store.update(tick("TSLA", 190, 4).with_previous_close(Decimal::from(220)));
    assert!(!moves(&sub.drain()).is_empty());
}

#[test]
fn significant_move_can_be_disabled() {
    let mut config = EngineConfig::default();
    config.display.significant_move_percent = None;
    let (store, mut sub, _) = store_with(config);
    store.watch(Instrument::equity("TSLA").unwrap());
    store.update(tick("TSLA", 300, 1).with_previous_close(Decimal::from(200)));
    assert!(moves(&sub.drain()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn sweep_flips_fresh_quotes_once() {
    let mut config = EngineConfig::default();
    config.staleness.stale_after_ms = 1_000;
    let (store, mut sub, _) = store_with(config);
    store.watch(Instrument::equity("AAPL").unwrap());
    store.watch(Instrument::equity("MSFT").unwrap());
    store.update(tick("AAPL", 100, 1));
    sub.drain();

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(store.sweep(Instant::now()), 0);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(store.sweep(Instant::now()), 1);
    assert_eq!(
        sub.drain(),
        vec![EngineEvent::StalenessChanged {
            symbol: sym("AAPL"),
            from: Staleness::Fresh,
            to: Staleness::Stale,
        }]
    );
    assert_eq!(store.sweep(Instant::now()), 0);
    // MSFT never had a price and stays unknown.
    assert_eq!(store.get(&sym("MSFT")).unwrap().staleness, Staleness::Unknown);

    store.update(tick("AAPL", 101, 2));
    let events = sub.drain();
    assert!(events.contains(&EngineEvent::StalenessChanged {
        symbol: sym("AAPL"),
        from: Staleness::Stale,
        to: Staleness::Fresh,
    }));
}

#[test]
fn snapshot_orders_alphabetically_or_crypto_first() {
    let (store, _sub, _) = store();
    store.watch(Instrument::equity("MSFT").unwrap());
    store.watch(Instrument::crypto("BTC").unwrap());
    store.watch(Instrument::equity("AAPL").unwrap());
    store.watch(Instrument::crypto("ADA").unwrap());

    let order = |quotes: Vec<tickerfeed::Quote>| -> Vec<String> {
        quotes.iter().map(|q| q.symbol().to_string()).collect()
    };
    assert_eq!(order(store.snapshot()), ["AAPL", "ADA", "BTC", "MSFT"]);

    let mut config = EngineConfig::default();
    config.display.group_crypto_first = true;
    store.apply_config(&config);
    assert_eq!(order(store.snapshot()), ["ADA", "BTC", "AAPL", "MSFT"]);
}

#[test]
fn retain_drops_symbols_outside_the_watchlist() {
    let (store, _sub, _) = store();
    assert!(store.watch(Instrument::equity("AAPL").unwrap()));
    assert!(!store.watch(Instrument::equity("AAPL").unwrap()));
    store.watch(Instrument::equity("MSFT").unwrap());

    let keep: HashSet<Symbol> = [sym("AAPL")].into_iter().collect();
    assert_eq!(store.retain(&keep), vec![sym("MSFT")]);
    assert!(!store.is_watched(&sym("MSFT")));
    assert!(!store.update(tick("MSFT", 1, 1)));
    assert_eq!(store.len(), 1);
}

#[test]
fn concurrent_writers_publish_in_apply_order() {
    use std::sync::atomic::{AtomicI64, Ordering};

    let metrics = Arc::new(EngineMetrics::default());
    let bus = EventBus::new(1 << 17, Arc::clone(&metrics));
    let mut sub = bus.subscribe();
    let store = QuoteStore::new(&EngineConfig::default(), bus, Arc::clone(&metrics));
    store.watch(Instrument::equity("AAPL").unwrap());

    let seq = AtomicI64::new(1);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..5_000 {
                    let n = seq.fetch_add(1, Ordering::Relaxed);
                    store.update(tick("AAPL", 100 + n % 7, n));
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..2_000 {
                store.sweep(Instant::now() + Duration::from_secs(3_600));
            }
        });
    });

    let events = sub.drain();
    assert_eq!(metrics.snapshot().dropped_events, 0);
    let mut last_ts = None;
    let mut staleness = Staleness::Unknown;
    for event in &events {
        match event {
            EngineEvent::QuoteUpdated(q) => {
                assert!(q.source_ts > last_ts, "update for {:?} after {last_ts:?}", q.source_ts);
                last_ts = q.source_ts;
            }
            EngineEvent::StalenessChanged { from, to, .. } => {
                assert_eq!(*from, staleness, "staleness events out of order");
                staleness = *to;
            }
            _ => {}
        }
    }
    assert!(last_ts.is_some());
    assert_eq!(staleness, store.get(&sym("AAPL")).unwrap().staleness);
}
