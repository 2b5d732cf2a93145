use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use tickerfeed_core::{EngineError, IconSource, ProviderKey, Symbol};

use crate::http;

/// Provider key used in logs.
pub const KEY: ProviderKey = ProviderKey::new("stock-icons");

/// Default location of the `<TICKER>.png` files.
pub const BASE_URL: &str =
    "https://raw.githubusercontent.com/krypdoh/stock-icons/refs/heads/main/ticker_icons";

/// Ticker logos served as `<base>/<TICKER>.png`.
///
/// With a cache directory, downloads are written to `<dir>/<TICKER>.png` and read
/// back from there before going to the network. Disk failures only cost a
/// download; they are never reported as errors.
#[derive(Debug, Clone)]
pub struct GithubIcons {
    client: Client,
    base_url: String,
    cache_dir: Option<PathBuf>,
}

impl GithubIcons {
    /// Connector against the public icon repository without a disk cache.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            cache_dir: None,
        }
    }

    /// Serve icons from another location.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Persist downloads under `dir`.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    fn file_name(symbol: &Symbol) -> String {
        format!("{symbol}.png")
    }

    async fn read_cached(dir: &Path, file: &str) -> Option<Vec<u8>> {
        match tokio::fs::read(dir.join(file)).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(file, error = %e, "cannot read cached icon");
                }
                None
            }
        }
    }

    async fn write_cached(dir: &Path, file: &str, bytes: &[u8]) {
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(dir.join(file), bytes).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(dir = %dir.display(), file, error = %e, "cannot persist icon");
        }
    }
}

#[async_trait]
impl IconSource for GithubIcons {
    fn key(&self) -> ProviderKey {
        KEY
    }

    async fn fetch_icon(&self, symbol: &Symbol) -> Result<Option<Vec<u8>>, EngineError> {
        let file = Self::file_name(symbol);
        if let Some(dir) = &self.cache_dir
            && let Some(bytes) = Self::read_cached(dir, &file).await
        {
            tracing::trace!(symbol = %symbol, "icon served from disk");
            return Ok(Some(bytes));
        }

        let url = http::endpoint(KEY, &self.base_url, &[file.as_str()])?;
        let what = format!("icon for {symbol}");
        let bytes = match http::fetch(KEY, &what, self.client.get(url)).await {
            Ok(bytes) => bytes,
            Err(EngineError::NotFound { .. }) => {
                tracing::debug!(symbol = %symbol, "no icon published");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some(dir) = &self.cache_dir {
            Self::write_cached(dir, &file, &bytes).await;
        }
        Ok(Some(bytes))
    }
}
