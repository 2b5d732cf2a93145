//! Memoised configuration snapshots.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tickerfeed_core::EngineError;
use tickerfeed_types::EngineConfig;

/// Where configuration snapshots are loaded from.
pub trait ConfigSource: Send + Sync {
    /// Load and parse the current configuration.
    ///
    /// # Errors
    /// Returns `Config` or `InvalidArg` errors when the stored settings are unusable.
    fn load(&self) -> Result<EngineConfig, EngineError>;

    /// Human-readable origin used in logs.
    fn describe(&self) -> String;
}

/// JSON settings file.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    /// Read settings from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The settings file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for JsonFileSource {
    fn load(&self) -> Result<EngineConfig, EngineError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            EngineError::InvalidArg(format!("cannot read {}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            EngineError::InvalidArg(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory configuration, replaceable at runtime. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticSource {
    config: Mutex<EngineConfig>,
}

impl StaticSource {
    /// Serve `config`.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    /// Replace the served configuration; takes effect on the next cache invalidation.
    pub fn set(&self, config: EngineConfig) {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> Result<EngineConfig, EngineError> {
        Ok(self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn describe(&self) -> String {
        "static configuration".to_string()
    }
}

impl<S: ConfigSource + ?Sized> ConfigSource for Arc<S> {
    fn load(&self) -> Result<EngineConfig, EngineError> {
        (**self).load()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<S: ConfigSource + ?Sized> ConfigSource for Box<S> {
    fn load(&self) -> Result<EngineConfig, EngineError> {
        (**self).load()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Default)]
struct Snapshots {
    current: Option<Arc<EngineConfig>>,
    last_good: Option<Arc<EngineConfig>>,
}

/// Memoised view of the persisted configuration.
///
/// [`ConfigCache::current`] returns the same `Arc` until [`ConfigCache::invalidate`]
/// is called. A snapshot that fails to load or validate is replaced by the last good
/// one, or by the defaults when there never was one.
pub struct ConfigCache {
    source: Box<dyn ConfigSource>,
    snapshots: RwLock<Snapshots>,
}

impl ConfigCache {
    /// Cache over `source`; nothing is loaded until first use.
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            snapshots: RwLock::new(Snapshots::default()),
        }
    }

    /// Current snapshot, loading it on first use after an invalidation.
    pub fn current(&self) -> Arc<EngineConfig> {
        if let Some(cfg) = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .as_ref()
        {
            return Arc::clone(cfg);
        }

        let mut snaps = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have loaded while we waited for the write lock.
        if let Some(cfg) = snaps.current.as_ref() {
            return Arc::clone(cfg);
        }

        let loaded = self
            .source
            .load()
            .and_then(|cfg| cfg.validate().map(|()| cfg).map_err(EngineError::from));
        let cfg = match loaded {
            Ok(cfg) => {
                let cfg = Arc::new(cfg);
                snaps.last_good = Some(Arc::clone(&cfg));
                cfg
            }
            Err(e) => {
                let fallback = snaps.last_good.clone();
                tracing::warn!(
                    source = %self.source.describe(),
                    error = %e,
                    using_last_good = fallback.is_some(),
                    "configuration load failed; falling back"
                );
                fallback.unwrap_or_else(|| Arc::new(EngineConfig::default()))
            }
        };
        snaps.current = Some(Arc::clone(&cfg));
        cfg
    }

    /// Forget the memoised snapshot so the next [`ConfigCache::current`] reloads.
    pub fn invalidate(&self) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .current = None;
    }
}

impl std::fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCache")
            .field("source", &self.source.describe())
            .finish_non_exhaustive()
    }
}
