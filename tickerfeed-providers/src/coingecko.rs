use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tickerfeed_core::{
    AssetKind, Credential, EngineError, Instrument, ProviderKey, QuoteBatch, QuoteSource,
    QuoteTick, Symbol,
};

use crate::http;
use crate::positive_price;

/// Provider key used for CoinGecko credentials (`"coingecko"` in the settings file).
pub const KEY: ProviderKey = ProviderKey::new("coingecko");

/// Default API base URL.
pub const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Header carrying a demo-plan API key.
pub const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Ids per `/simple/price` request.
const BATCH_LIMIT: usize = 50;

/// Ticker to CoinGecko coin id for the common coins. Anything else falls back to
/// the lower-cased ticker unless mapped with [`CoinGeckoQuotes::with_coin_id`].
const KNOWN_IDS: &[(&str, &str)] = &[
    ("ADA", "cardano"),
    ("AVAX", "avalanche-2"),
    ("BCH", "bitcoin-cash"),
    ("BNB", "binancecoin"),
    ("BTC", "bitcoin"),
    ("DOGE", "dogecoin"),
    ("DOT", "polkadot"),
    ("ETH", "ethereum"),
    ("LINK", "chainlink"),
    ("LTC", "litecoin"),
    ("MATIC", "matic-network"),
    ("SHIB", "shiba-inu"),
    ("SOL", "solana"),
    ("TRX", "tron"),
    ("USDC", "usd-coin"),
    ("USDT", "tether"),
    ("XLM", "stellar"),
    ("XRP", "ripple"),
];

#[derive(Debug, Deserialize)]
struct CoinPrice {
    usd: Option<f64>,
    usd_24h_change: Option<f64>,
    /// Unix seconds.
    last_updated_at: Option<i64>,
}

/// Crypto prices from CoinGecko's `/simple/price` endpoint.
///
/// CoinGecko answers without a key, so by default the polling worker does not
/// draw a credential. Call [`with_credentials`](Self::with_credentials) when a
/// `coingecko` key is configured; it is then sent in the demo-key header.
///
/// CoinGecko has no previous close for coins. The 24 hour change is turned into
/// a reference price so change percentages stay meaningful.
#[derive(Debug, Clone)]
pub struct CoinGeckoQuotes {
    client: Client,
    base_url: String,
    ids: BTreeMap<String, String>,
    use_credentials: bool,
}

impl CoinGeckoQuotes {
    /// Connector against the public API with the built-in coin ids.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            ids: KNOWN_IDS
                .iter()
                .map(|(s, id)| ((*s).to_string(), (*id).to_string()))
                .collect(),
            use_credentials: false,
        }
    }

    /// Point the connector at another server, e.g. a local mock.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Draw API keys from the credential pool.
    #[must_use]
    pub const fn with_credentials(mut self) -> Self {
        self.use_credentials = true;
        self
    }

    /// Map a ticker to a CoinGecko coin id, overriding the built-in table.
    #[must_use]
    pub fn with_coin_id(mut self, symbol: &str, id: impl Into<String>) -> Self {
        self.ids.insert(symbol.trim().to_ascii_uppercase(), id.into());
        self
    }

    /// Coin id used for a ticker.
    #[must_use]
    pub fn coin_id(&self, symbol: &Symbol) -> String {
        self.ids
            .get(symbol.as_str())
            .cloned()
            .unwrap_or_else(|| symbol.as_str().to_ascii_lowercase())
    }
}

/// Price 24 hours ago given the current price and the percent change since.
fn reference_price(price: Decimal, change_24h: Option<f64>) -> Option<Decimal> {
    let pct = Decimal::try_from(change_24h?).ok()?;
    let factor = Decimal::ONE + pct / Decimal::ONE_HUNDRED;
    if factor <= Decimal::ZERO {
        return None;
    }
    Some((price / factor).round_dp(8).normalize())
}

#[async_trait]
impl QuoteSource for CoinGeckoQuotes {
    fn key(&self) -> ProviderKey {
        KEY
    }

    fn supports_kind(&self, kind: AssetKind) -> bool {
        kind == AssetKind::Crypto
    }

    fn max_batch_size(&self) -> usize {
        BATCH_LIMIT
    }

    fn requires_credential(&self) -> bool {
        self.use_credentials
    }

    async fn fetch_quotes(
        &self,
        instruments: &[Instrument],
        credential: Option<&Credential>,
    ) -> Result<QuoteBatch, EngineError> {
        let wanted: Vec<(Symbol, String)> = instruments
            .iter()
            .map(|i| (i.symbol().clone(), self.coin_id(i.symbol())))
            .collect();
        let mut ids: Vec<&str> = wanted.iter().map(|(_, id)| id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut url = http::endpoint(KEY, &self.base_url, &["simple", "price"])?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("vs_currencies", "usd")
            .append_pair("include_24hr_change", "true")
            .append_pair("include_last_updated_at", "true");

        let mut request = self.client.get(url);
        if let Some(credential) = credential {
            request = request.header(API_KEY_HEADER, credential.api_key());
        }
        let body = http::fetch(KEY, "coingecko prices", request).await?;
        let prices: HashMap<String, CoinPrice> = http::decode(KEY, &body)?;

        let mut batch = QuoteBatch::default();
        for (symbol, id) in wanted {
            let Some(coin) = prices.get(&id) else {
                batch.missing.push(symbol);
                continue;
            };
            let Some(price) = positive_price(coin.usd) else {
                batch.missing.push(symbol);
                continue;
            };
            let ts = coin
                .last_updated_at
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
                .unwrap_or_else(Utc::now);
            batch.ticks.push(QuoteTick {
                symbol,
                price: Some(price),
                previous_close: reference_price(price, coin.usd_24h_change),
                ts,
            });
        }
        if !batch.missing.is_empty() {
            tracing::debug!(provider = %KEY, missing = ?batch.missing, "coins without a price");
        }
        Ok(batch)
    }
}
