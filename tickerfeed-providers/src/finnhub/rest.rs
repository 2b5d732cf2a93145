use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tickerfeed_core::{
    AssetKind, Credential, EngineError, Instrument, ProviderKey, QuoteBatch, QuoteSource,
    QuoteTick, Symbol,
};

use super::{KEY, REST_URL};
use crate::http;
use crate::positive_price;

/// Requests fanned out per batch; Finnhub quotes one symbol per call.
const BATCH_LIMIT: usize = 10;

/// Response from `/quote`. Unknown symbols come back as all zeros.
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price.
    c: Option<f64>,
    /// Previous close.
    pc: Option<f64>,
    /// Unix seconds of the last trade.
    t: Option<i64>,
}

/// Equity quotes from Finnhub's `/quote` endpoint.
#[derive(Debug, Clone)]
pub struct FinnhubQuotes {
    client: Client,
    base_url: String,
}

impl FinnhubQuotes {
    /// Connector against the public Finnhub API.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: REST_URL.to_string(),
        }
    }

    /// Point the connector at another server, e.g. a local mock.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn quote_one(
        &self,
        symbol: &Symbol,
        api_key: &str,
    ) -> Result<Option<QuoteTick>, EngineError> {
        let mut url = http::endpoint(KEY, &self.base_url, &["quote"])?;
        url.query_pairs_mut()
            .append_pair("symbol", symbol.as_str())
            .append_pair("token", api_key);

        let body = http::fetch(KEY, &format!("quote for {symbol}"), self.client.get(url)).await?;
        let raw: QuoteResponse = http::decode(KEY, &body)?;

        let Some(price) = positive_price(raw.c) else {
            return Ok(None);
        };
        let ts = raw
            .t
            .filter(|t| *t > 0)
            .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
            .unwrap_or_else(Utc::now);
        Ok(Some(QuoteTick {
            symbol: symbol.clone(),
            price: Some(price),
            previous_close: positive_price(raw.pc),
            ts,
        }))
    }
}

/// Rank used to pick the error reported for a partially failed batch.
const fn severity(e: &EngineError) -> u8 {
    match e {
        EngineError::RateLimited { .. } => 3,
        EngineError::Auth { .. } => 2,
        EngineError::Transient { .. } => 1,
        _ => 0,
    }
}

#[async_trait]
impl QuoteSource for FinnhubQuotes {
    fn key(&self) -> ProviderKey {
        KEY
    }

    fn supports_kind(&self, kind: AssetKind) -> bool {
        kind == AssetKind::Equity
    }

    fn max_batch_size(&self) -> usize {
        BATCH_LIMIT
    }

    async fn fetch_quotes(
        &self,
        instruments: &[Instrument],
        credential: Option<&Credential>,
    ) -> Result<QuoteBatch, EngineError> {
        let Some(credential) = credential else {
            return Err(EngineError::no_credentials(KEY.as_str()));
        };
        let results = join_all(
            instruments
                .iter()
                .map(|i| self.quote_one(i.symbol(), credential.api_key())),
        )
        .await;

        let mut batch = QuoteBatch::default();
        for (inst, result) in instruments.iter().zip(results) {
            match result {
                Ok(Some(tick)) => batch.ticks.push(tick),
                Ok(None) => {
                    tracing::debug!(symbol = %inst.symbol(), "finnhub returned no price");
                    batch.missing.push(inst.symbol().clone());
                }
                Err(e) => {
                    tracing::debug!(symbol = %inst.symbol(), error = %e, "finnhub quote failed");
                    batch.missing.push(inst.symbol().clone());
                    if e.failure_kind().is_some()
                        && batch.failure.as_ref().is_none_or(|f| severity(&e) > severity(f))
                    {
                        batch.failure = Some(e);
                    }
                }
            }
        }

        if batch.ticks.is_empty()
            && let Some(failure) = batch.failure.take()
        {
            return Err(failure);
        }
        Ok(batch)
    }
}
