//! Configuration types consumed by the engine and its connectors.
//!
//! Every section is `#[serde(default)]` so a settings file only needs the fields it
//! wants to override. Durations are stored as milliseconds and exposed through
//! `Duration` accessors.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AssetKind, ConfigError};

/// Exponential backoff configuration for reconnects and batch retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Minimum backoff delay in milliseconds.
    pub min_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Exponential factor to increase delay after each failure (>= 1).
    pub factor: u32,
    /// Random jitter percentage [0, 100] added to each delay.
    pub jitter_percent: u8,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: 500,
            max_backoff_ms: 30_000,
            factor: 2,
            jitter_percent: 20,
        }
    }
}

/// One API key for one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Provider name, matched case-insensitively against connector keys (e.g. `finnhub`).
    pub provider: String,
    /// Secret API key.
    pub api_key: String,
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A symbol on the watch-list together with its asset kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedSymbol {
    /// Ticker as entered by the user; normalised by the engine.
    pub symbol: String,
    /// Asset kind; defaults to equity.
    #[serde(default)]
    pub kind: AssetKind,
}

impl WatchedSymbol {
    /// Convenience constructor for an equity symbol.
    pub fn equity(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: AssetKind::Equity,
        }
    }

    /// Convenience constructor for a crypto symbol.
    pub fn crypto(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: AssetKind::Crypto,
        }
    }
}

/// Polling connector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Poll interval while the primary market is open.
    pub interval_ms: u64,
    /// Poll interval outside trading hours.
    pub off_hours_interval_ms: u64,
    /// Upper bound on symbols per request batch (the provider may impose a lower one).
    pub batch_size: usize,
    /// Maximum number of batch requests in flight at once.
    pub max_concurrent_batches: usize,
    /// Backoff between retries of a failed batch.
    pub batch_retry: BackoffConfig,
    /// Attempts per batch and cycle, including the first one.
    pub max_batch_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 300_000,
            off_hours_interval_ms: 900_000,
            batch_size: 10,
            max_concurrent_batches: 2,
            batch_retry: BackoffConfig {
                min_backoff_ms: 1_000,
                max_backoff_ms: 20_000,
                factor: 2,
                jitter_percent: 20,
            },
            max_batch_attempts: 3,
        }
    }
}

impl PollConfig {
    /// Poll interval during trading hours.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Poll interval outside trading hours.
    #[must_use]
    pub const fn off_hours_interval(&self) -> Duration {
        Duration::from_millis(self.off_hours_interval_ms)
    }
}

/// Streaming connector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Disable to run on polling only.
    pub enabled: bool,
    /// A symbol with no tick for this long fails over to polling.
    pub liveness_window_ms: u64,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            liveness_window_ms: 30_000,
            reconnect: BackoffConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Liveness window as a `Duration`.
    #[must_use]
    pub const fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }
}

/// Quote staleness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Elapsed time after which a fresh quote becomes stale.
    pub stale_after_ms: u64,
    /// Period of the background sweep.
    pub sweep_interval_ms: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 600_000,
            sweep_interval_ms: 5_000,
        }
    }
}

impl StalenessConfig {
    /// Staleness threshold as a `Duration`.
    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Sweep period as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Credential cooldown policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Short pause applied to a slot after a transient network error.
    pub transient_backoff_ms: u64,
    /// Base cooldown after a rate-limit or auth failure; doubles per consecutive failure.
    pub rate_limit_cooldown_ms: u64,
    /// Cap on any cooldown.
    pub max_cooldown_ms: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            transient_backoff_ms: 2_000,
            rate_limit_cooldown_ms: 60_000,
            max_cooldown_ms: 300_000,
        }
    }
}

/// History cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryCacheConfig {
    /// TTL applied to ranges without an explicit override.
    pub default_ttl_ms: u64,
    /// Per-range TTL overrides keyed by range label (`1d`, `5d`, `1mo`).
    pub per_range_ttl_ms: BTreeMap<String, u64>,
    /// How long a failed fetch without any cached data is remembered.
    pub negative_ttl_ms: u64,
    /// Maximum number of cached series.
    pub max_entries: usize,
    /// Series older than this are dropped by the periodic sweep.
    pub retention_ms: u64,
    /// Concurrent history fetches across all keys.
    pub max_concurrent_fetches: usize,
}

impl Default for HistoryCacheConfig {
    fn default() -> Self {
        let mut per_range_ttl_ms = BTreeMap::new();
        per_range_ttl_ms.insert("5d".to_string(), 1_800_000);
        per_range_ttl_ms.insert("1mo".to_string(), 21_600_000);
        Self {
            default_ttl_ms: 300_000,
            per_range_ttl_ms,
            negative_ttl_ms: 30_000,
            max_entries: 256,
            retention_ms: 86_400_000,
            max_concurrent_fetches: 4,
        }
    }
}

impl HistoryCacheConfig {
    /// TTL for a range label, falling back to the default.
    #[must_use]
    pub fn ttl_for(&self, range_label: &str) -> Duration {
        let ms = self
            .per_range_ttl_ms
            .get(range_label)
            .copied()
            .unwrap_or(self.default_ttl_ms);
        Duration::from_millis(ms)
    }

    /// Negative-cache TTL as a `Duration`.
    #[must_use]
    pub const fn negative_ttl(&self) -> Duration {
        Duration::from_millis(self.negative_ttl_ms)
    }

    /// Retention window as a `Duration`.
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

/// Icon cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconCacheConfig {
    /// Maximum number of icons kept in memory.
    pub max_entries: usize,
    /// Optional byte budget across all cached icons.
    pub max_bytes: Option<u64>,
    /// Directory where downloaded icons are persisted between runs.
    pub cache_dir: Option<PathBuf>,
    /// Icon downloads allowed at once; read when the cache is created.
    pub max_concurrent_fetches: usize,
}

impl Default for IconCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 128,
            max_bytes: None,
            cache_dir: None,
            max_concurrent_fetches: 4,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Per-subscriber queue length; the oldest events are dropped on overflow.
    pub subscriber_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
        }
    }
}

/// HTTP client settings shared by REST, icon and history providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Proxy URL applied to all outbound requests.
    pub proxy: Option<String>,
    /// PEM file with an additional trusted root certificate.
    pub ca_cert_file: Option<PathBuf>,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            ca_cert_file: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl NetworkConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Settings that shape what consumers are notified about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Absolute percent move against the previous close that raises a significant-move event.
    pub significant_move_percent: Option<f64>,
    /// Order crypto symbols before equities in snapshots.
    pub group_crypto_first: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            significant_move_percent: Some(5.0),
            group_crypto_first: false,
        }
    }
}

/// Immutable engine configuration as read from persisted settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// API keys; several entries for the same provider are load-balanced.
    pub credentials: Vec<CredentialConfig>,
    /// Symbols to track.
    pub watchlist: Vec<WatchedSymbol>,
    /// Exchange holidays (`YYYY-MM-DD`) on which the equity market is closed.
    pub market_holidays: Vec<String>,
    /// Polling connector settings.
    pub poll: PollConfig,
    /// Streaming connector settings.
    pub stream: StreamConfig,
    /// Staleness settings.
    pub staleness: StalenessConfig,
    /// Credential cooldown policy.
    pub cooldown: CooldownConfig,
    /// History cache settings.
    pub history: HistoryCacheConfig,
    /// Icon cache settings.
    pub icons: IconCacheConfig,
    /// Event bus settings.
    pub events: EventBusConfig,
    /// HTTP client settings.
    pub network: NetworkConfig,
    /// Notification shaping.
    pub display: DisplayConfig,
    /// Grace period granted to workers on shutdown before they are aborted.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            credentials: Vec::new(),
            watchlist: vec![
                WatchedSymbol::equity("AAPL"),
                WatchedSymbol::equity("GOOG"),
                WatchedSymbol::equity("MSFT"),
            ],
            market_holidays: Vec::new(),
            poll: PollConfig::default(),
            stream: StreamConfig::default(),
            staleness: StalenessConfig::default(),
            cooldown: CooldownConfig::default(),
            history: HistoryCacheConfig::default(),
            icons: IconCacheConfig::default(),
            events: EventBusConfig::default(),
            network: NetworkConfig::default(),
            display: DisplayConfig::default(),
            shutdown_grace_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Check the snapshot for values the engine cannot run with.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero: [(&'static str, u64); 8] = [
            ("poll.interval_ms", self.poll.interval_ms),
            ("poll.off_hours_interval_ms", self.poll.off_hours_interval_ms),
            ("poll.max_batch_attempts", u64::from(self.poll.max_batch_attempts)),
            ("stream.liveness_window_ms", self.stream.liveness_window_ms),
            ("staleness.stale_after_ms", self.staleness.stale_after_ms),
            ("staleness.sweep_interval_ms", self.staleness.sweep_interval_ms),
            ("cooldown.max_cooldown_ms", self.cooldown.max_cooldown_ms),
            ("events.subscriber_capacity", self.events.subscriber_capacity as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }
        let non_zero_sizes: [(&'static str, usize); 4] = [
            ("poll.batch_size", self.poll.batch_size),
            ("poll.max_concurrent_batches", self.poll.max_concurrent_batches),
            ("history.max_entries", self.history.max_entries),
            ("icons.max_entries", self.icons.max_entries),
        ];
        for (field, value) in non_zero_sizes {
            if value == 0 {
                return Err(ConfigError::ZeroValue { field });
            }
        }
        if self.history.max_concurrent_fetches == 0 {
            return Err(ConfigError::ZeroValue {
                field: "history.max_concurrent_fetches",
            });
        }
        if self.icons.max_concurrent_fetches == 0 {
            return Err(ConfigError::ZeroValue {
                field: "icons.max_concurrent_fetches",
            });
        }
        for (index, w) in self.watchlist.iter().enumerate() {
            if w.symbol.trim().is_empty() {
                return Err(ConfigError::EmptySymbol { index });
            }
        }
        for c in &self.credentials {
            if c.api_key.trim().is_empty() {
                return Err(ConfigError::EmptyApiKey {
                    provider: c.provider.clone(),
                });
            }
        }
        if self.cooldown.rate_limit_cooldown_ms > self.cooldown.max_cooldown_ms {
            return Err(ConfigError::Inconsistent(
                "cooldown.rate_limit_cooldown_ms exceeds cooldown.max_cooldown_ms".into(),
            ));
        }
        if self.stream.reconnect.min_backoff_ms > self.stream.reconnect.max_backoff_ms {
            return Err(ConfigError::Inconsistent(
                "stream.reconnect.min_backoff_ms exceeds max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}
