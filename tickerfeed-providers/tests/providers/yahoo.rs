use httpmock::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;
use tickerfeed_core::{EngineError, HistoryRange, HistorySource};
use tickerfeed_providers::YahooHistory;

use crate::common::{client, crypto, equity};

#[tokio::test]
async fn chart_is_parsed_sorted_and_gaps_skipped() {
    let server = MockServer::start_async().await;
    let chart = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v8/finance/chart/AAPL")
                .query_param("range", "1d")
                .query_param("interval", "5m")
                .header_exists("user-agent");
            then.status(200).json_body(json!({
                "chart": {
                    "result": [{
                        "meta": {"symbol": "AAPL", "currency": "USD"},
                        "timestamp": [1_700_000_600, 1_700_000_000, 1_700_000_300],
                        "indicators": {"quote": [{
                            "close": [152.5, 150.25, null],
                            "open": [1.0, 1.0, 1.0]
                        }]}
                    }],
                    "error": null
                }
            }));
        })
        .await;

    let series = YahooHistory::new(client())
        .with_base_url(server.base_url())
        .fetch_history(&equity("AAPL"), HistoryRange::OneDay)
        .await
        .unwrap();

    chart.assert_async().await;
    let points = series.points();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].ts.timestamp(), 1_700_000_000);
    assert_eq!(points[0].price, Decimal::new(15025, 2));
    assert_eq!(points[1].price, Decimal::new(1525, 1));
    assert_eq!(series.range(), HistoryRange::OneDay);
}

#[tokio::test]
async fn crypto_is_quoted_in_usd() {
    let server = MockServer::start_async().await;
    let chart = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v8/finance/chart/BTC-USD")
                .query_param("range", "1mo")
                .query_param("interval", "1d");
            then.status(200).json_body(json!({
                "chart": {"result": [{
                    "timestamp": [1_700_000_000],
                    "indicators": {"quote": [{"close": [36000.5]}]}
                }], "error": null}
            }));
        })
        .await;

    let series = YahooHistory::new(client())
        .with_base_url(server.base_url())
        .fetch_history(&crypto("BTC"), HistoryRange::OneMonth)
        .await
        .unwrap();
    chart.assert_async().await;
    assert_eq!(series.points().len(), 1);
}

#[tokio::test]
async fn unknown_symbol_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v8/finance/chart/NOPE");
            then.status(404).json_body(json!({
                "chart": {"result": null, "error": {
                    "code": "Not Found",
                    "description": "No data found, symbol may be delisted"
                }}
            }));
        })
        .await;

    let err = YahooHistory::new(client())
        .with_base_url(server.base_url())
        .fetch_history(&equity("NOPE"), HistoryRange::FiveDays)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn chart_error_with_ok_status_is_reported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v8/finance/chart/AAPL");
            then.status(200).json_body(json!({
                "chart": {"result": null, "error": {
                    "code": "Bad Request",
                    "description": "Invalid input - interval=5m is not supported"
                }}
            }));
        })
        .await;

    let err = YahooHistory::new(client())
        .with_base_url(server.base_url())
        .fetch_history(&equity("AAPL"), HistoryRange::OneDay)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Malformed { .. }));
}
