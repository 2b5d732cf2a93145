use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tickerfeed_core::{EngineError, ProviderKey};
use tickerfeed_types::NetworkConfig;
use url::Url;

/// Build the HTTP client shared by the REST, history and icon connectors.
///
/// Honours the configured proxy, an extra trusted root certificate and the
/// per-request timeout.
///
/// # Errors
/// Returns `InvalidArg` when the proxy URL or certificate file is unusable.
pub fn build_client(network: &NetworkConfig) -> Result<Client, EngineError> {
    let mut builder = Client::builder().timeout(network.request_timeout());

    if let Some(proxy_url) = network
        .proxy
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| EngineError::InvalidArg(format!("invalid proxy '{proxy_url}': {e}")))?;
        builder = builder.proxy(proxy);
    }

    if let Some(path) = &network.ca_cert_file {
        let pem = std::fs::read(path).map_err(|e| {
            EngineError::InvalidArg(format!("cannot read certificate {}: {e}", path.display()))
        })?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
            EngineError::InvalidArg(format!("invalid certificate {}: {e}", path.display()))
        })?;
        builder = builder.add_root_certificate(cert);
    }

    builder
        .build()
        .map_err(|e| EngineError::InvalidArg(format!("cannot build HTTP client: {e}")))
}

/// Seconds from a `Retry-After` header. HTTP-date values are ignored.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success status onto the engine's failure taxonomy.
///
/// `what` describes the requested resource and is used for `NotFound`.
///
/// # Errors
/// Returns the classified error for any status outside 2xx.
pub fn classify_status(
    provider: ProviderKey,
    what: &str,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<(), EngineError> {
    if status.is_success() {
        return Ok(());
    }
    let name = provider.as_str();
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => EngineError::rate_limited(name, retry_after(headers)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            EngineError::auth(name, format!("HTTP {status}"))
        }
        StatusCode::NOT_FOUND => EngineError::not_found(what),
        StatusCode::REQUEST_TIMEOUT => EngineError::transient(name, format!("HTTP {status}")),
        s if s.is_server_error() => EngineError::transient(name, format!("HTTP {status}")),
        s => EngineError::malformed(name, format!("request rejected with HTTP {s}")),
    })
}

pub(crate) fn classify_send(provider: ProviderKey, err: &reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::transient(provider.as_str(), "request timed out")
    } else if err.is_decode() {
        EngineError::malformed(provider.as_str(), err.to_string())
    } else {
        EngineError::transient(provider.as_str(), err.to_string())
    }
}

/// Send `request` and return the body of a successful response.
pub(crate) async fn fetch(
    provider: ProviderKey,
    what: &str,
    request: RequestBuilder,
) -> Result<Vec<u8>, EngineError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_send(provider, &e))?;
    tracing::trace!(
        provider = %provider,
        status = %response.status(),
        path = response.url().path(),
        "response"
    );
    classify_status(provider, what, response.status(), response.headers())?;
    let body = response
        .bytes()
        .await
        .map_err(|e| classify_send(provider, &e))?;
    Ok(body.to_vec())
}

pub(crate) fn decode<T: DeserializeOwned>(
    provider: ProviderKey,
    body: &[u8],
) -> Result<T, EngineError> {
    serde_json::from_slice(body)
        .map_err(|e| EngineError::malformed(provider.as_str(), e.to_string()))
}

/// Append path segments to a base URL, tolerating a trailing slash on the base.
pub(crate) fn endpoint(
    provider: ProviderKey,
    base: &str,
    segments: &[&str],
) -> Result<Url, EngineError> {
    let mut url = Url::parse(base).map_err(|e| {
        EngineError::InvalidArg(format!("invalid {provider} base URL '{base}': {e}"))
    })?;
    url.path_segments_mut()
        .map_err(|()| {
            EngineError::InvalidArg(format!("{provider} base URL '{base}' cannot take a path"))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
