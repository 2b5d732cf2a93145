use std::time::Duration;

use tickerfeed::supervisor::supervisor_sm::{
    Action, Event, Phase, PollSource, Route, StreamProvider, Supervisor,
};
use tickerfeed_core::{AssetKind, ConnectorState, Instrument, ProviderKey, Symbol};
use tokio::time::Instant;

const WS: ProviderKey = ProviderKey::new("ws");
const WINDOW: Duration = Duration::from_secs(30);

fn sup() -> Supervisor {
    Supervisor::new(
        vec![StreamProvider::new(WS, vec![AssetKind::Equity])],
        vec![
            PollSource::new(ProviderKey::new("rest"), vec![AssetKind::Equity]),
            PollSource::new(ProviderKey::new("coins"), vec![AssetKind::Crypto]),
        ],
        WINDOW,
    )
}

fn eq(s: &str) -> Instrument {
    Instrument::equity(s).unwrap()
}

fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

/// AAPL and MSFT streaming on a subscribed provider since `t0`.
fn streaming(t0: Instant) -> Supervisor {
    let s = sup();
    let (s, _) = s.handle(Event::WatchlistChanged {
        instruments: vec![eq("AAPL"), eq("MSFT")],
        now: t0,
    });
    let (s, _) = s.handle(Event::LinkState {
        provider: 0,
        state: ConnectorState::Subscribed,
        now: t0,
    });
    let (s, _) = s.handle(Event::Ticked {
        provider: 0,
        symbols: vec![sym("AAPL"), sym("MSFT")],
        now: t0,
    });
    assert_eq!(s.provider_state(0), Some(ConnectorState::Subscribed));
    s
}

#[test]
fn watchlist_while_disconnected_polls_everything_and_hands_stream_its_kind() {
    let t0 = Instant::now();
    let (s, actions) = sup().handle(Event::WatchlistChanged {
        instruments: vec![eq("MSFT"), Instrument::crypto("BTC").unwrap(), eq("AAPL")],
        now: t0,
    });

    assert_eq!(
        actions,
        vec![
            Action::StartPolling {
                source: 0,
                instruments: vec![eq("AAPL"), eq("MSFT")],
            },
            Action::StartPolling {
                source: 1,
                instruments: vec![Instrument::crypto("BTC").unwrap()],
            },
            Action::SetStreamSymbols {
                provider: 0,
                symbols: vec![sym("AAPL"), sym("MSFT")],
            },
        ]
    );
    assert_eq!(s.route(&sym("BTC")), Some(Route::Polling));
    assert_eq!(s.polled_by(0), vec![sym("AAPL"), sym("MSFT")]);
}

#[test]
fn subscribe_reports_degraded_until_every_symbol_ticks() {
    let t0 = Instant::now();
    let (s, _) = sup().handle(Event::WatchlistChanged {
        instruments: vec![eq("AAPL"), eq("MSFT")],
        now: t0,
    });

    let (s, actions) = s.handle(Event::LinkState {
        provider: 0,
        state: ConnectorState::Connecting,
        now: t0,
    });
    assert_eq!(
        actions,
        vec![Action::EmitState {
            provider: WS,
            from: ConnectorState::Disconnected,
            to: ConnectorState::Connecting,
        }]
    );

    let (s, actions) = s.handle(Event::LinkState {
        provider: 0,
        state: ConnectorState::Subscribed,
        now: t0,
    });
    assert_eq!(
        actions,
        vec![Action::EmitState {
            provider: WS,
            from: ConnectorState::Connecting,
            to: ConnectorState::DegradedPolling,
        }]
    );

    let (s, actions) = s.handle(Event::Ticked {
        provider: 0,
        symbols: vec![sym("AAPL")],
        now: t0,
    });
    assert_eq!(
        actions,
        vec![Action::StopPolling {
            source: 0,
            symbols: vec![sym("AAPL")],
        }]
    );
    assert!(matches!(s.route(&sym("AAPL")), Some(Route::Streaming { .. })));

    let (s, actions) = s.handle(Event::Ticked {
        provider: 0,
        symbols: vec![sym("MSFT")],
        now: t0,
    });
    assert_eq!(
        actions,
        vec![
            Action::StopPolling {
                source: 0,
                symbols: vec![sym("MSFT")],
            },
            Action::EmitState {
                provider: WS,
                from: ConnectorState::DegradedPolling,
                to: ConnectorState::Subscribed,
            },
        ]
    );
    assert!(s.polled_by(0).is_empty());
}

#[test]
fn symbol_added_to_subscribed_stream_awaits_and_is_primed() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (s, actions) = s.handle(Event::WatchlistChanged {
        instruments: vec![eq("AAPL"), eq("MSFT"), eq("TSLA")],
        now: t0,
    });
    assert_eq!(
        actions,
        vec![
            Action::Prime {
                source: 0,
                instruments: vec![eq("TSLA")],
            },
            Action::SetStreamSymbols {
                provider: 0,
                symbols: vec![sym("AAPL"), sym("MSFT"), sym("TSLA")],
            },
        ]
    );
    assert_eq!(
        s.route(&sym("TSLA")),
        Some(Route::AwaitingStream { since: t0 })
    );
}

#[test]
fn quiet_symbols_fail_over_after_liveness_window() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (s, _) = s.handle(Event::Ticked {
        provider: 0,
        symbols: vec![sym("AAPL")],
        now: t0 + Duration::from_secs(20),
    });

    let (s, actions) = s.handle(Event::LivenessTick {
        now: t0 + WINDOW - Duration::from_millis(1),
    });
    assert!(actions.is_empty());

    let (s, actions) = s.handle(Event::LivenessTick { now: t0 + WINDOW });
    assert_eq!(
        actions,
        vec![
            Action::StartPolling {
                source: 0,
                instruments: vec![eq("MSFT")],
            },
            Action::EmitState {
                provider: WS,
                from: ConnectorState::Subscribed,
                to: ConnectorState::DegradedPolling,
            },
        ]
    );
    assert!(matches!(s.route(&sym("AAPL")), Some(Route::Streaming { .. })));
    assert_eq!(s.route(&sym("MSFT")), Some(Route::Polling));
}

#[test]
fn awaiting_symbol_without_first_tick_fails_over() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (s, _) = s.handle(Event::WatchlistChanged {
        instruments: vec![eq("AAPL"), eq("MSFT"), eq("TSLA")],
        now: t0,
    });
    let (s, _) = s.handle(Event::Ticked {
        provider: 0,
        symbols: vec![sym("AAPL"), sym("MSFT")],
        now: t0 + WINDOW,
    });
    let (s, actions) = s.handle(Event::LivenessTick { now: t0 + WINDOW });
    assert!(actions.contains(&Action::StartPolling {
        source: 0,
        instruments: vec![eq("TSLA")],
    }));
    assert_eq!(s.route(&sym("TSLA")), Some(Route::Polling));
}

#[test]
fn disconnect_fails_every_symbol_over() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (s, actions) = s.handle(Event::LinkState {
        provider: 0,
        state: ConnectorState::Disconnected,
        now: t0,
    });
    assert_eq!(
        actions,
        vec![
            Action::StartPolling {
                source: 0,
                instruments: vec![eq("AAPL"), eq("MSFT")],
            },
            Action::EmitState {
                provider: WS,
                from: ConnectorState::Subscribed,
                to: ConnectorState::Disconnected,
            },
        ]
    );
    assert_eq!(s.polled_by(0).len(), 2);
}

#[test]
fn rejected_symbol_is_polled_for_good() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (s, actions) = s.handle(Event::Rejected {
        provider: 0,
        symbol: sym("MSFT"),
    });
    assert_eq!(
        actions,
        vec![
            Action::StartPolling {
                source: 0,
                instruments: vec![eq("MSFT")],
            },
            Action::SetStreamSymbols {
                provider: 0,
                symbols: vec![sym("AAPL")],
            },
        ]
    );
    // A refused symbol does not make the provider degraded.
    assert_eq!(s.provider_state(0), Some(ConnectorState::Subscribed));

    let (s, actions) = s.handle(Event::Ticked {
        provider: 0,
        symbols: vec![sym("MSFT")],
        now: t0,
    });
    assert!(actions.is_empty());
    assert_eq!(s.route(&sym("MSFT")), Some(Route::Polling));
}

#[test]
fn removed_symbols_stop_polling_and_leave_the_stream() {
    let t0 = Instant::now();
    let (s, _) = sup().handle(Event::WatchlistChanged {
        instruments: vec![eq("AAPL"), eq("MSFT")],
        now: t0,
    });
    let (s, actions) = s.handle(Event::WatchlistChanged {
        instruments: vec![eq("AAPL")],
        now: t0,
    });
    assert_eq!(
        actions,
        vec![
            Action::StopPolling {
                source: 0,
                symbols: vec![sym("MSFT")],
            },
            Action::SetStreamSymbols {
                provider: 0,
                symbols: vec![sym("AAPL")],
            },
        ]
    );
    assert!(s.route(&sym("MSFT")).is_none());
}

#[test]
fn unknown_ticks_are_ignored() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (_, actions) = s.handle(Event::Ticked {
        provider: 0,
        symbols: vec![sym("NVDA")],
        now: t0,
    });
    assert!(actions.is_empty());
}

#[test]
fn shutdown_stops_everything_and_ignores_later_events() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (s, actions) = s.handle(Event::Shutdown);
    assert_eq!(actions, vec![Action::StopAll]);
    assert_eq!(s.phase, Phase::ShuttingDown);

    let (_, actions) = s.handle(Event::LinkState {
        provider: 0,
        state: ConnectorState::Disconnected,
        now: t0,
    });
    assert!(actions.is_empty());
}

#[test]
fn kind_without_stream_never_touches_the_stream() {
    let t0 = Instant::now();
    let s = streaming(t0);
    let (s, actions) = s.handle(Event::WatchlistChanged {
        instruments: vec![eq("AAPL"), eq("MSFT"), Instrument::crypto("ETH").unwrap()],
        now: t0,
    });
    assert_eq!(
        actions,
        vec![Action::StartPolling {
            source: 1,
            instruments: vec![Instrument::crypto("ETH").unwrap()],
        }]
    );
    assert_eq!(s.provider_state(0), Some(ConnectorState::Subscribed));
}
