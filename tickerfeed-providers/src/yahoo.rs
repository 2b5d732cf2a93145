use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tickerfeed_core::{
    AssetKind, EngineError, HistoryPoint, HistoryRange, HistorySeries, HistorySource, Instrument,
    ProviderKey,
};

use crate::http;
use crate::positive_price;

/// Provider key used in logs.
pub const KEY: ProviderKey = ProviderKey::new("yahoo");

/// Default chart API base URL.
pub const BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo refuses requests without a browser-like agent.
const BROWSER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBars>,
}

#[derive(Debug, Deserialize)]
struct QuoteBars {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Bar interval requested for each range.
#[must_use]
pub const fn interval_for(range: HistoryRange) -> &'static str {
    match range {
        HistoryRange::OneDay => "5m",
        HistoryRange::FiveDays => "30m",
        HistoryRange::OneMonth => "1d",
    }
}

/// Price history from Yahoo's `/v8/finance/chart` endpoint.
///
/// Crypto instruments are requested against USD (`BTC` becomes `BTC-USD`).
#[derive(Debug, Clone)]
pub struct YahooHistory {
    client: Client,
    base_url: String,
}

impl YahooHistory {
    /// Connector against the public chart API.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the connector at another server, e.g. a local mock.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn yahoo_symbol(instrument: &Instrument) -> String {
        match instrument.kind() {
            AssetKind::Crypto => format!("{}-USD", instrument.symbol()),
            _ => instrument.symbol().to_string(),
        }
    }
}

#[async_trait]
impl HistorySource for YahooHistory {
    fn key(&self) -> ProviderKey {
        KEY
    }

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<HistorySeries, EngineError> {
        let symbol = instrument.symbol();
        let what = format!("{range} history for {symbol}");
        let ticker = Self::yahoo_symbol(instrument);
        let segments = ["v8", "finance", "chart", ticker.as_str()];
        let mut url = http::endpoint(KEY, &self.base_url, &segments)?;
        url.query_pairs_mut()
            .append_pair("range", range.label())
            .append_pair("interval", interval_for(range));

        let request = self.client.get(url).header(USER_AGENT, BROWSER_AGENT);
        let body = http::fetch(KEY, &what, request).await?;
        let envelope: ChartEnvelope = http::decode(KEY, &body)?;

        if let Some(err) = envelope.chart.error {
            tracing::debug!(provider = %KEY, symbol = %symbol, code = %err.code, "chart error");
            return Err(if err.code.eq_ignore_ascii_case("not found") {
                EngineError::not_found(what)
            } else {
                EngineError::malformed(KEY.as_str(), format!("{}: {}", err.code, err.description))
            });
        }
        let result = envelope
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| EngineError::not_found(what.clone()))?;

        let closes = result
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default();
        let points: Vec<HistoryPoint> = result
            .timestamp
            .iter()
            .zip(closes)
            .filter_map(|(ts, close)| {
                Some(HistoryPoint {
                    ts: DateTime::<Utc>::from_timestamp(*ts, 0)?,
                    price: positive_price(close)?,
                })
            })
            .collect();
        tracing::debug!(
            provider = %KEY,
            symbol = %symbol,
            range = %range,
            points = points.len(),
            "history fetched"
        );
        Ok(HistorySeries::new(symbol.clone(), range, points))
    }
}
