use thiserror::Error;

/// Problems found while validating a configuration snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric setting must be strictly positive.
    #[error("{field} must be greater than zero")]
    ZeroValue {
        /// Dotted path of the offending field, e.g. `poll.interval_ms`.
        field: &'static str,
    },

    /// A watched symbol is empty after trimming.
    #[error("watch-list entry #{index} has an empty symbol")]
    EmptySymbol {
        /// Position of the entry in the watch-list.
        index: usize,
    },

    /// A credential entry carries no key.
    #[error("credential for provider '{provider}' has an empty api key")]
    EmptyApiKey {
        /// Provider name as written in the configuration.
        provider: String,
    },

    /// Two settings contradict each other.
    #[error("inconsistent setting: {0}")]
    Inconsistent(String),
}
