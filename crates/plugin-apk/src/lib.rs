//! APK format plugin: parses Alpine's `APKINDEX.tar.gz` into
//! candidates, orders versions via Alpine's tokenization rules, and
//! publishes a mirrored or filtered repository layout.

pub mod index;
pub mod version;

use std::path::Path;

use async_trait::async_trait;
use packmirror_plugin_api::{
    AuthContext, Candidate, FetchCandidatesResult, FormatPlugin, PluginError, Publisher, PublishItem,
    PublishMode, Syncer, VersionOrd,
};

pub use version::ApkVersionOrd;

#[derive(Debug, thiserror::Error)]
pub enum ApkPluginError {
    #[error("failed to parse APKINDEX: {0}")]
    Parse(String),
}

#[async_trait]
pub trait ApkTransport: Send + Sync {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, PluginError>;
}

/// The single `<arch>` branch (e.g. `v3.19/main/x86_64`) this sync targets.
#[derive(Debug, Clone)]
pub struct ApkRepoConfig {
    pub branch_path: String,
}

pub struct ApkPlugin<T: ApkTransport> {
    transport: T,
    config: ApkRepoConfig,
    version_ord: ApkVersionOrd,
    publisher: ApkPublisher,
}

impl<T: ApkTransport> ApkPlugin<T> {
    pub fn new(transport: T, config: ApkRepoConfig) -> Self {
        let publisher = ApkPublisher {
            branch_path: config.branch_path.clone(),
        };
        Self {
            transport,
            config,
            version_ord: ApkVersionOrd,
            publisher,
        }
    }
}

#[async_trait]
impl<T: ApkTransport> Syncer for ApkPlugin<T> {
    async fn fetch_candidates(
        &self,
        _feed_url: &str,
        _auth: &AuthContext,
        _mirror_mode: bool,
    ) -> Result<FetchCandidatesResult, PluginError> {
        let path = format!("{}/APKINDEX.tar.gz", self.config.branch_path);
        let archive = self.transport.get_bytes(&path).await?;
        let text = index::extract_index_text(&archive).map_err(|e| PluginError::Parse(e.to_string()))?;
        let packages = index::parse_stanzas(&text);

        let candidates = packages
            .into_iter()
            .map(|pkg| {
                let href = format!("{}/{}", self.config.branch_path, pkg.filename());
                let sha256 = decode_checksum(&pkg.checksum);
                Candidate {
                    name: pkg.name.clone(),
                    version: pkg.version.clone(),
                    arch: Some(pkg.arch.clone()),
                    sha256,
                    size_bytes: Some(pkg.size),
                    href,
                    content_type: "apk".to_string(),
                    metadata: pkg.metadata_json(),
                }
            })
            .collect();

        Ok(FetchCandidatesResult {
            candidates,
            files: Vec::new(),
        })
    }
}

/// Upstream's `C:` field is a base64 `Q1` + SHA-1 digest, not a SHA-256.
/// This mirror always recomputes a SHA-256 itself once a package is
/// fetched into the pool, so an upstream checksum that isn't hex SHA-256
/// is simply left unset rather than surfaced as a mismatch.
fn decode_checksum(checksum: &str) -> Option<String> {
    let hex_candidate = checksum.strip_prefix("Q1").unwrap_or(checksum);
    if hex_candidate.len() == 64 && hex_candidate.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex_candidate.to_lowercase())
    } else {
        None
    }
}

pub struct ApkPublisher {
    pub branch_path: String,
}

#[async_trait]
impl Publisher for ApkPublisher {
    async fn publish(
        &self,
        items: &[PublishItem],
        target_dir: &Path,
        _mode: PublishMode,
    ) -> Result<(), PluginError> {
        let mut packages = Vec::new();
        for item in items {
            let dst = target_dir.join(&self.branch_path).join(&item.filename);
            hardlink_or_copy(&item.pool_path, &dst).map_err(|e| PluginError::Publish(e.to_string()))?;
            packages.push(index::ApkPackage {
                name: item.name.clone(),
                version: item.version.clone(),
                arch: item.arch.clone().unwrap_or_default(),
                size: item.size_bytes.unwrap_or(0),
                checksum: format!("Q1{}", item.sha256),
                url: item
                    .metadata
                    .get("url")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                license: item
                    .metadata
                    .get("license")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                depends: item
                    .metadata
                    .get("depends")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                provides: item
                    .metadata
                    .get("provides")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                origin: item
                    .metadata
                    .get("origin")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                maintainer: item
                    .metadata
                    .get("maintainer")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                description: item
                    .metadata
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        let text = index::write_stanzas(&packages);
        let archive = index::build_index_tar_gz(&text).map_err(|e| PluginError::Publish(e.to_string()))?;
        let index_path = target_dir.join(&self.branch_path).join("APKINDEX.tar.gz");
        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PluginError::Publish(e.to_string()))?;
        }
        std::fs::write(&index_path, archive).map_err(|e| PluginError::Publish(e.to_string()))?;
        Ok(())
    }
}

fn hardlink_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if dst.exists() {
        std::fs::remove_file(dst)?;
    }
    match std::fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(18) => {
            // EXDEV: cross-device hardlink, same fallback as packmirror_pool::Pool::link.
            std::fs::copy(src, dst)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

impl<T: ApkTransport> FormatPlugin for ApkPlugin<T> {
    fn content_type(&self) -> &'static str {
        "apk"
    }

    fn syncer(&self) -> &dyn Syncer {
        self
    }

    fn publisher(&self) -> &dyn Publisher {
        &self.publisher
    }

    fn version_ord(&self) -> &dyn VersionOrd {
        &self.version_ord
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_sha256_checksum_is_dropped() {
        assert_eq!(decode_checksum("Q1abcdef"), None);
    }

    #[test]
    fn hex_sha256_checksum_is_kept() {
        let sha = "a".repeat(64);
        assert_eq!(decode_checksum(&format!("Q1{sha}")), Some(sha));
    }
}
