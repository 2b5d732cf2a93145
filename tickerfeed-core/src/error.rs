use std::time::Duration;

use thiserror::Error;
use tickerfeed_types::ConfigError;

/// Unified error type for the tickerfeed workspace.
///
/// Provider failures are classified so the credential pool can decide how long a key
/// should rest: transient network trouble, rate limiting and rejected credentials
/// each map to a different [`FailureKind`]. Errors are `Clone` because a single
/// deduplicated fetch hands its result to every waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    /// Network hiccup, timeout or 5xx response; worth retrying soon.
    #[error("{provider} transient failure: {msg}")]
    Transient {
        /// Provider name that failed.
        provider: String,
        /// Human-readable error message.
        msg: String,
    },

    /// The provider throttled the request.
    #[error("{provider} rate limited the request")]
    RateLimited {
        /// Provider name that throttled.
        provider: String,
        /// Provider-supplied hint for when to retry, if any.
        retry_after: Option<Duration>,
    },

    /// The provider rejected the credential.
    #[error("{provider} rejected the credential: {msg}")]
    Auth {
        /// Provider name that rejected the key.
        provider: String,
        /// Human-readable error message.
        msg: String,
    },

    /// The provider answered with a payload that could not be understood.
    #[error("{provider} returned malformed data: {msg}")]
    Malformed {
        /// Provider name.
        provider: String,
        /// What was wrong with the payload.
        msg: String,
    },

    /// The provider cannot serve this symbol.
    #[error("{provider} does not support {symbol}")]
    CapabilityGap {
        /// Provider name.
        provider: String,
        /// Symbol the provider refused.
        symbol: String,
    },

    /// Invalid input argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// The configuration snapshot is unusable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A resource or symbol could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// Description of missing resource, e.g. "icon for AAPL".
        what: String,
    },

    /// No API key is configured for a provider that requires one.
    #[error("no credentials configured for {provider}")]
    NoCredentials {
        /// Provider name.
        provider: String,
    },

    /// The engine is stopping; pending work was abandoned.
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// How a provider failure affects the credential that was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Brief fixed pause.
    Transient,
    /// Escalating cooldown, at least as long as the provider hint.
    RateLimited {
        /// Provider-supplied retry hint.
        retry_after: Option<Duration>,
    },
    /// Escalating cooldown; the key may come back after an upstream fix.
    Auth,
}

impl EngineError {
    /// Helper: build a `Transient` error.
    pub fn transient(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `RateLimited` error.
    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after,
        }
    }

    /// Helper: build an `Auth` error.
    pub fn auth(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `Malformed` error.
    pub fn malformed(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Malformed {
            provider: provider.into(),
            msg: msg.into(),
        }
    }

    /// Helper: build a `CapabilityGap` error.
    pub fn capability_gap(provider: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::CapabilityGap {
            provider: provider.into(),
            symbol: symbol.into(),
        }
    }

    /// Helper: build a `NotFound` error for a description of the missing resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Helper: build a `NoCredentials` error.
    pub fn no_credentials(provider: impl Into<String>) -> Self {
        Self::NoCredentials {
            provider: provider.into(),
        }
    }

    /// Classification used by the credential pool.
    ///
    /// Returns `None` for errors that say nothing about the credential (bad input,
    /// malformed payloads, unsupported symbols, shutdown).
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Transient { .. } => Some(FailureKind::Transient),
            Self::RateLimited { retry_after, .. } => Some(FailureKind::RateLimited {
                retry_after: *retry_after,
            }),
            Self::Auth { .. } => Some(FailureKind::Auth),
            _ => None,
        }
    }

    /// Whether retrying the same request later could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::RateLimited { .. } | Self::Auth { .. }
        )
    }
}
