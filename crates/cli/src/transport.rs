//! A single transport shared by every format plugin, backed by the same
//! [`packmirror_fetcher::Fetcher`] the bulk-download path uses: each
//! plugin trait just needs `get_bytes`/`get_bytes_optional` against
//! paths relative to a repository's feed URL, with the fetcher's
//! retry/backoff, proxy, and TLS-cert handling applied uniformly.

use std::sync::Arc;

use async_trait::async_trait;
use packmirror_fetcher::Fetcher;
use packmirror_plugin_api::PluginError;
use tokio_util::sync::CancellationToken;

pub struct HttpTransport {
    fetcher: Arc<Fetcher>,
    base: url::Url,
}

impl HttpTransport {
    pub fn new(fetcher: Arc<Fetcher>, feed_url: &str) -> anyhow::Result<Self> {
        let mut base = url::Url::parse(feed_url)?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self { fetcher, base })
    }

    async fn fetch(&self, relative_path: &str) -> Result<Vec<u8>, PluginError> {
        let url = self
            .base
            .join(relative_path)
            .map_err(|e| PluginError::Fetch(e.to_string()))?;
        let fetched = self
            .fetcher
            .get(url.as_str(), None, &CancellationToken::new())
            .await
            .map_err(|e| PluginError::Fetch(e.to_string()))?;
        let bytes = tokio::fs::read(&fetched.temp_path)
            .await
            .map_err(|e| PluginError::Fetch(e.to_string()))?;
        let _ = tokio::fs::remove_file(&fetched.temp_path).await;
        Ok(bytes)
    }

    async fn fetch_optional(&self, relative_path: &str) -> Option<Vec<u8>> {
        self.fetch(relative_path).await.ok()
    }
}

#[async_trait]
impl packmirror_plugin_rpm::RpmTransport for HttpTransport {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, packmirror_plugin_rpm::RpmPluginError> {
        self.fetch(relative_path)
            .await
            .map_err(|e| packmirror_plugin_rpm::RpmPluginError::Io(std::io::Error::other(e.to_string())))
    }
}

#[async_trait]
impl packmirror_plugin_deb::DebTransport for HttpTransport {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, PluginError> {
        self.fetch(relative_path).await
    }

    async fn get_bytes_optional(&self, relative_path: &str) -> Option<Vec<u8>> {
        self.fetch_optional(relative_path).await
    }
}

#[async_trait]
impl packmirror_plugin_helm::HelmTransport for HttpTransport {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, PluginError> {
        self.fetch(relative_path).await
    }
}

#[async_trait]
impl packmirror_plugin_apk::ApkTransport for HttpTransport {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, PluginError> {
        self.fetch(relative_path).await
    }
}
