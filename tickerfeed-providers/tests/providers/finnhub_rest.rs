use std::time::Duration;

use httpmock::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;
use tickerfeed_core::{AssetKind, EngineError, QuoteSource};
use tickerfeed_providers::{FinnhubQuotes, finnhub};

use crate::common::{client, credential, equity, sym};

fn source(server: &MockServer) -> FinnhubQuotes {
    FinnhubQuotes::new(client()).with_base_url(server.base_url())
}

#[tokio::test]
async fn partial_batch_keeps_answers_and_reports_throttling() {
    let server = MockServer::start_async().await;
    let aapl = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/quote")
                .query_param("symbol", "AAPL")
                .query_param("token", "k1");
            then.status(200)
                .json_body(json!({"c": 150.25, "pc": 148.5, "t": 1_700_000_000, "d": 1.75}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote").query_param("symbol", "ZZZZ");
            then.status(200)
                .json_body(json!({"c": 0, "d": null, "dp": null, "pc": 0, "t": 0}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote").query_param("symbol", "TSLA");
            then.status(429).header("Retry-After", "30");
        })
        .await;

    let cred = credential(finnhub::KEY, "k1");
    let batch = source(&server)
        .fetch_quotes(
            &[equity("AAPL"), equity("ZZZZ"), equity("TSLA")],
            Some(&cred),
        )
        .await
        .unwrap();

    aapl.assert_async().await;
    assert_eq!(batch.ticks.len(), 1);
    let tick = &batch.ticks[0];
    assert_eq!(tick.symbol, sym("AAPL"));
    assert_eq!(tick.price, Some(Decimal::new(15025, 2)));
    assert_eq!(tick.previous_close, Some(Decimal::new(1485, 1)));
    assert_eq!(tick.ts.timestamp(), 1_700_000_000);
    assert_eq!(batch.missing, vec![sym("ZZZZ"), sym("TSLA")]);
    assert_eq!(
        batch.failure,
        Some(EngineError::rate_limited(
            "finnhub",
            Some(Duration::from_secs(30))
        ))
    );
}

#[tokio::test]
async fn nothing_usable_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote");
            then.status(401).json_body(json!({"error": "Invalid API key"}));
        })
        .await;

    let cred = credential(finnhub::KEY, "bad");
    let err = source(&server)
        .fetch_quotes(&[equity("AAPL"), equity("MSFT")], Some(&cred))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Auth { .. }));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote");
            then.status(502);
        })
        .await;

    let cred = credential(finnhub::KEY, "k1");
    let err = source(&server)
        .fetch_quotes(&[equity("AAPL")], Some(&cred))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, EngineError::Transient { .. }));
}

#[tokio::test]
async fn unparsable_body_is_missing_not_fatal() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote").query_param("symbol", "AAPL");
            then.status(200).body("<html>maintenance</html>");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/quote").query_param("symbol", "MSFT");
            then.status(200).json_body(json!({"c": 330.5, "pc": 331.0, "t": 1_700_000_000}));
        })
        .await;

    let cred = credential(finnhub::KEY, "k1");
    let batch = source(&server)
        .fetch_quotes(&[equity("AAPL"), equity("MSFT")], Some(&cred))
        .await
        .unwrap();
    assert_eq!(batch.ticks.len(), 1);
    assert_eq!(batch.missing, vec![sym("AAPL")]);
    assert!(batch.failure.is_none());
}

#[tokio::test]
async fn requires_a_key_and_quotes_equities_only() {
    let source = FinnhubQuotes::new(client());
    assert!(source.requires_credential());
    assert!(source.supports_kind(AssetKind::Equity));
    assert!(!source.supports_kind(AssetKind::Crypto));
    assert_eq!(source.max_batch_size(), 10);

    let err = source.fetch_quotes(&[equity("AAPL")], None).await.unwrap_err();
    assert!(matches!(err, EngineError::NoCredentials { .. }));
}
