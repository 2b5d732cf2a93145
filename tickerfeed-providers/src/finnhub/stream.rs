use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tickerfeed_core::{
    AssetKind, Credential, EngineError, ProviderKey, QuoteTick, StreamMessage, StreamSession,
    StreamSource, Symbol,
};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{KEY, STREAM_URL};
use crate::http::classify_status;
use crate::positive_price;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

/// One element of a `trade` frame. Volume and conditions are not used.
#[derive(Debug, Deserialize)]
struct Trade {
    s: String,
    p: f64,
    /// Unix milliseconds.
    t: i64,
}

/// Parse one text frame from the Finnhub feed.
///
/// A frame can carry several trades, possibly for the same symbol; only the
/// latest trade per symbol is kept. Trades that fail to parse are reported as
/// [`StreamMessage::Malformed`] next to the good ones. Unknown frame types yield
/// nothing.
#[must_use]
pub fn parse_frame(text: &str) -> Vec<StreamMessage> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            return vec![StreamMessage::Malformed {
                detail: format!("unparsable frame: {e}"),
            }];
        }
    };
    match frame.kind.as_str() {
        "trade" => trades(frame.data),
        "ping" => vec![StreamMessage::Heartbeat],
        "error" => {
            let msg = frame.msg.unwrap_or_default();
            match frame.symbol.as_deref().map(Symbol::new) {
                Some(Ok(symbol)) => vec![StreamMessage::Rejected {
                    symbol,
                    reason: msg,
                }],
                _ => vec![StreamMessage::ProviderError { msg }],
            }
        }
        _ => Vec::new(),
    }
}

fn trades(data: Vec<Value>) -> Vec<StreamMessage> {
    let mut latest: Vec<QuoteTick> = Vec::new();
    let mut out = Vec::new();
    for item in data {
        match parse_trade(item) {
            Ok(tick) => match latest.iter_mut().find(|t| t.symbol == tick.symbol) {
                Some(prev) if prev.ts <= tick.ts => *prev = tick,
                Some(_) => {}
                None => latest.push(tick),
            },
            Err(detail) => out.push(StreamMessage::Malformed { detail }),
        }
    }
    if !latest.is_empty() {
        out.insert(0, StreamMessage::Ticks(latest));
    }
    out
}

fn parse_trade(item: Value) -> Result<QuoteTick, String> {
    let raw: Trade = serde_json::from_value(item).map_err(|e| format!("bad trade: {e}"))?;
    let symbol = Symbol::new(&raw.s).map_err(|e| e.to_string())?;
    let price = positive_price(Some(raw.p))
        .ok_or_else(|| format!("trade for {symbol} has no usable price"))?;
    let ts = DateTime::<Utc>::from_timestamp_millis(raw.t)
        .ok_or_else(|| format!("trade for {symbol} has timestamp out of range"))?;
    Ok(QuoteTick::new(symbol, price, ts))
}

fn classify_connect(err: WsError) -> EngineError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            classify_status(KEY, "finnhub stream", status, response.headers())
                .err()
                .unwrap_or_else(|| {
                    EngineError::transient(
                        KEY.as_str(),
                        format!("handshake failed with HTTP {status}"),
                    )
                })
        }
        other => EngineError::transient(KEY.as_str(), other.to_string()),
    }
}

/// Live equity trades over Finnhub's WebSocket feed.
#[derive(Debug, Clone)]
pub struct FinnhubStream {
    url: String,
    connect_timeout: Duration,
}

impl Default for FinnhubStream {
    fn default() -> Self {
        Self::new()
    }
}

impl FinnhubStream {
    /// Connector against the public feed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            url: STREAM_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Use another WebSocket endpoint, e.g. a local test server.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Bound on the TCP, TLS and upgrade handshake.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl StreamSource for FinnhubStream {
    fn key(&self) -> ProviderKey {
        KEY
    }

    fn supports_kind(&self, kind: AssetKind) -> bool {
        kind == AssetKind::Equity
    }

    async fn connect(
        &self,
        credential: Option<&Credential>,
    ) -> Result<Box<dyn StreamSession>, EngineError> {
        let credential = credential.ok_or_else(|| EngineError::no_credentials(KEY.as_str()))?;
        let mut url = Url::parse(&self.url).map_err(|e| {
            EngineError::InvalidArg(format!("invalid finnhub stream URL '{}': {e}", self.url))
        })?;
        url.query_pairs_mut().append_pair("token", credential.api_key());

        let handshake = connect_async(url.as_str());
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| EngineError::transient(KEY.as_str(), "stream handshake timed out"))?
            .map_err(classify_connect)?;
        tracing::debug!(provider = %KEY, slot = ?credential.slot(), "stream connected");

        Ok(Box::new(FinnhubSession {
            ws,
            pending: VecDeque::new(),
        }))
    }
}

struct FinnhubSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Messages parsed from a frame but not yet handed out.
    pending: VecDeque<StreamMessage>,
}

impl FinnhubSession {
    async fn send_all(&mut self, kind: &str, symbols: &[Symbol]) -> Result<(), EngineError> {
        for symbol in symbols {
            let payload = serde_json::json!({ "type": kind, "symbol": symbol.as_str() });
            self.ws
                .feed(Message::text(payload.to_string()))
                .await
                .map_err(|e| EngineError::transient(KEY.as_str(), e.to_string()))?;
        }
        self.ws
            .flush()
            .await
            .map_err(|e| EngineError::transient(KEY.as_str(), e.to_string()))
    }
}

#[async_trait]
impl StreamSession for FinnhubSession {
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), EngineError> {
        self.send_all("subscribe", symbols).await
    }

    async fn unsubscribe(&mut self, symbols: &[Symbol]) -> Result<(), EngineError> {
        self.send_all("unsubscribe", symbols).await
    }

    async fn next_message(&mut self) -> Option<Result<StreamMessage, EngineError>> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(Ok(msg));
            }
            let frame = match self.ws.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(EngineError::transient(KEY.as_str(), e.to_string()))),
            };
            match frame {
                Message::Text(text) => self.pending.extend(parse_frame(text.as_str())),
                Message::Ping(_) | Message::Pong(_) => return Some(Ok(StreamMessage::Heartbeat)),
                Message::Binary(_) => {
                    return Some(Ok(StreamMessage::Malformed {
                        detail: "unexpected binary frame".into(),
                    }));
                }
                Message::Close(reason) => {
                    tracing::debug!(provider = %KEY, ?reason, "stream closed by server");
                    return None;
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::trace!(provider = %KEY, error = %e, "stream close");
        }
    }
}
