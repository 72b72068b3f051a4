//! Authenticated HTTP fetch with retry, streaming checksum verification,
//! and conditional (`ETag`/`Last-Modified`) caching.
//!
//! Transport is `reqwest` over `tokio`, matching the rest of this
//! workspace's HTTP stack; retries use `backoff`'s async exponential
//! backoff with jitter.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoff::{future::retry, ExponentialBackoff};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch of {url} cancelled")]
    Cancelled { url: String },
}

impl packmirror_errors::Classify for FetchError {
    fn kind(&self) -> packmirror_errors::ErrorKind {
        match self {
            FetchError::ChecksumMismatch { .. } => packmirror_errors::ErrorKind::ChecksumMismatch,
            FetchError::Cancelled { .. } => packmirror_errors::ErrorKind::Cancelled,
            _ => packmirror_errors::ErrorKind::FetchFailed,
        }
    }
}

/// Transport tuning read from a repository's (possibly merged-over-root)
/// `download`/`proxy`/`ssl` configuration sections.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub ca_bundle: Option<PathBuf>,
    pub verify_tls: bool,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry_attempts: 5,
            http_proxy: None,
            https_proxy: None,
            proxy_username: None,
            proxy_password: None,
            ca_bundle: None,
            verify_tls: true,
            client_cert: None,
            client_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub temp_path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub enum ConditionalFetch {
    NotModified,
    Fetched(FetchedFile),
}

#[derive(Debug, Clone, Default)]
struct CacheEntry {
    etag: Option<String>,
    last_modified: Option<String>,
}

pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
    tmp_dir: PathBuf,
    cache: DashMap<Url, CacheEntry>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig, tmp_dir: PathBuf) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls);
        if let Some(proxy) = &config.https_proxy {
            if let Ok(p) = reqwest::Proxy::https(proxy) {
                builder = builder.proxy(apply_proxy_auth(p, &config));
            }
        }
        if let Some(proxy) = &config.http_proxy {
            if let Ok(p) = reqwest::Proxy::http(proxy) {
                builder = builder.proxy(apply_proxy_auth(p, &config));
            }
        }
        if let Some(ca_bundle) = &config.ca_bundle {
            let pem = std::fs::read(ca_bundle)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|source| FetchError::Request {
                url: ca_bundle.display().to_string(),
                source,
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert_path), Some(key_path)) = (&config.client_cert, &config.client_key) {
            let mut identity_pem = std::fs::read(cert_path)?;
            identity_pem.extend(std::fs::read(key_path)?);
            let identity = reqwest::Identity::from_pem(&identity_pem).map_err(|source| FetchError::Request {
                url: cert_path.display().to_string(),
                source,
            })?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|source| FetchError::Request {
                url: "<client-build>".to_string(),
                source,
            })?;
        Ok(Self {
            client,
            config,
            tmp_dir,
            cache: DashMap::new(),
        })
    }

    /// Streams `url` into a temp file, verifying `expected_sha256` as the
    /// bytes arrive if given. Retries transport errors and 5xx responses
    /// with exponential backoff; never retries 4xx.
    pub async fn get(
        &self,
        url: &str,
        expected_sha256: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile, FetchError> {
        let url_owned = url.to_string();
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.timeout * self.config.retry_attempts.max(1)),
            ..ExponentialBackoff::default()
        };
        let result = retry(backoff, || async {
            if cancel.is_cancelled() {
                return Err(backoff::Error::permanent(FetchError::Cancelled {
                    url: url_owned.clone(),
                }));
            }
            self.get_once(&url_owned, expected_sha256, cancel)
                .await
                .map_err(|e| match &e {
                    FetchError::Status { status, .. } if (400..500).contains(status) => {
                        backoff::Error::permanent(e)
                    }
                    FetchError::ChecksumMismatch { .. } | FetchError::Cancelled { .. } => {
                        backoff::Error::permanent(e)
                    }
                    _ => backoff::Error::transient(e),
                })
        })
        .await;
        result
    }

    async fn get_once(
        &self,
        url: &str,
        expected_sha256: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile, FetchError> {
        let resp = tokio::select! {
            r = self.client.get(url).send() => r.map_err(|source| FetchError::Request { url: url.to_string(), source })?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { url: url.to_string() }),
        };
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        self.stream_to_temp(url, resp, expected_sha256, cancel).await
    }

    async fn stream_to_temp(
        &self,
        url: &str,
        mut resp: reqwest::Response,
        expected_sha256: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile, FetchError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.tmp_dir)?;
        let mut hasher = Sha256::new();
        let mut size_bytes = 0u64;
        loop {
            let chunk = tokio::select! {
                c = resp.chunk() => c.map_err(|source| FetchError::Request { url: url.to_string(), source })?,
                _ = cancel.cancelled() => {
                    drop(tmp);
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
            };
            let Some(chunk) = chunk else { break };
            hasher.update(&chunk);
            tmp.write_all(&chunk)?;
            size_bytes += chunk.len() as u64;
        }
        let sha256 = hex::encode(hasher.finalize());
        if let Some(expected) = expected_sha256 {
            if expected != sha256 {
                return Err(FetchError::ChecksumMismatch {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual: sha256,
                });
            }
        }
        let temp_path = tmp.into_temp_path();
        let persisted = temp_path.keep()?;
        debug!(url, sha256 = %sha256, size_bytes, "fetch complete");
        Ok(FetchedFile {
            temp_path: persisted,
            sha256,
            size_bytes,
        })
    }

    /// Conditional metadata fetch: issues `If-None-Match`/`If-Modified-Since`
    /// from this `Fetcher`'s per-URL cache, and returns `NotModified`
    /// without downloading a body when the server agrees.
    pub async fn get_conditional(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ConditionalFetch, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::Status {
            url: url.to_string(),
            status: 0,
        })?;
        let cached = self.cache.get(&parsed).map(|e| e.clone()).unwrap_or_default();

        let mut req = self.client.get(url);
        if let Some(etag) = &cached.etag {
            req = req.header("If-None-Match", etag);
        }
        if let Some(lm) = &cached.last_modified {
            req = req.header("If-Modified-Since", lm);
        }
        let resp = tokio::select! {
            r = req.send() => r.map_err(|source| FetchError::Request { url: url.to_string(), source })?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { url: url.to_string() }),
        };
        if resp.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(ConditionalFetch::NotModified);
        }
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let fetched = self.stream_to_temp(url, resp, None, cancel).await?;
        self.cache.insert(
            parsed,
            CacheEntry {
                etag,
                last_modified,
            },
        );
        Ok(ConditionalFetch::Fetched(fetched))
    }
}

fn apply_proxy_auth(mut proxy: reqwest::Proxy, config: &FetcherConfig) -> reqwest::Proxy {
    if let (Some(user), Some(pass)) = (&config.proxy_username, &config.proxy_password) {
        proxy = proxy.basic_auth(user, pass);
    }
    proxy
}

/// Shared by every format plugin: a bounded worker pool draining a flat
/// list of items to download, backed by `buffer_unordered`.
pub async fn download_all<T, F, Fut>(
    items: Vec<T>,
    parallel: usize,
    work: F,
) -> Vec<Result<(), FetchError>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), FetchError>> + Send,
{
    use futures::stream::StreamExt;
    let work = Arc::new(work);
    futures::stream::iter(items.into_iter().map(|item| {
        let work = Arc::clone(&work);
        async move { work(item).await }
    }))
    .buffer_unordered(parallel.max(1))
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetcher_config_defaults_are_sane() {
        let cfg = FetcherConfig::default();
        assert!(cfg.verify_tls);
        assert!(cfg.retry_attempts > 0);
    }
}
