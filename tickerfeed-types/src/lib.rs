//! Configuration primitives and small shared DTOs for the tickerfeed workspace.
//!
//! Everything in here is plain data: the engine reads an [`EngineConfig`] snapshot
//! and never writes it back.
#![warn(missing_docs)]

mod asset;
mod config;
mod connector;
mod error;

pub use asset::AssetKind;
pub use config::{
    BackoffConfig, CooldownConfig, CredentialConfig, DisplayConfig, EngineConfig,
    EventBusConfig, HistoryCacheConfig, IconCacheConfig, NetworkConfig, PollConfig,
    StalenessConfig, StreamConfig, WatchedSymbol,
};
pub use connector::ProviderKey;
pub use error::ConfigError;
