//! RPM format plugin: parses `repomd.xml` + `primary.xml(.gz|.xz)` into
//! candidates, compares NEVRA versions, and publishes filtered or
//! mirrored repository layouts.

pub mod primary;
pub mod repomd;
pub mod version;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use packmirror_plugin_api::{
    AuthContext, Candidate, FetchCandidatesResult, FormatPlugin, Publisher, PublishItem, PublishMode,
    PluginError, RepositoryFileCandidate, Syncer, VersionOrd,
};

pub use version::RpmVersionOrd;

#[derive(Debug, thiserror::Error)]
pub enum RpmPluginError {
    #[error("xml error: {0}")]
    Xml(String),
    #[error("missing repomd entry for {0}")]
    MissingRepomdEntry(String),
    #[error("unsupported compression for {0}")]
    UnsupportedCompression(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RpmPluginError> for PluginError {
    fn from(e: RpmPluginError) -> Self {
        PluginError::Parse(e.to_string())
    }
}

/// Fetches `repomd.xml` and `primary.xml(.gz|.xz)` over HTTP, relative
/// to `feed_url`. Kept separate from `Syncer` so callers (the sync
/// engine's tests, mainly) can inject fixture bytes instead of going to
/// the network.
#[async_trait]
pub trait RpmTransport: Send + Sync {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, RpmPluginError>;
}

pub struct RpmPlugin<T: RpmTransport> {
    transport: T,
    version_ord: RpmVersionOrd,
}

impl<T: RpmTransport> RpmPlugin<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            version_ord: RpmVersionOrd,
        }
    }

    fn decompress_data_file(&self, href: &str, bytes: Vec<u8>) -> Result<Vec<u8>, RpmPluginError> {
        if href.ends_with(".gz") {
            repomd::gzip_decompress(&bytes).map_err(RpmPluginError::Io)
        } else if href.ends_with(".xz") {
            repomd::xz_decompress(&bytes).map_err(RpmPluginError::Io)
        } else {
            Ok(bytes)
        }
    }
}

#[async_trait]
impl<T: RpmTransport> Syncer for RpmPlugin<T> {
    async fn fetch_candidates(
        &self,
        _feed_url: &str,
        _auth: &AuthContext,
        mirror_mode: bool,
    ) -> Result<FetchCandidatesResult, PluginError> {
        let repomd_bytes = self
            .transport
            .get_bytes("repodata/repomd.xml")
            .await
            .map_err(|e| PluginError::Fetch(e.to_string()))?;
        let repomd = repomd::parse(&repomd_bytes).map_err(|e| PluginError::Parse(e.to_string()))?;

        let primary_record = repomd
            .find("primary")
            .ok_or_else(|| PluginError::Parse("repomd.xml has no primary data entry".to_string()))?;
        let primary_bytes = self
            .transport
            .get_bytes(&primary_record.location_href)
            .await
            .map_err(|e| PluginError::Fetch(e.to_string()))?;
        let primary_xml = self
            .decompress_data_file(&primary_record.location_href, primary_bytes)
            .map_err(|e| PluginError::Parse(e.to_string()))?;
        let packages = primary::parse(&primary_xml).map_err(|e| PluginError::Parse(e.to_string()))?;

        let candidates = packages
            .into_iter()
            .map(|pkg| Candidate {
                name: pkg.name.clone(),
                version: pkg.evr(),
                arch: Some(pkg.arch.clone()),
                sha256: if pkg.checksum_type == "sha256" {
                    Some(pkg.checksum.clone())
                } else {
                    None
                },
                size_bytes: Some(pkg.size_package),
                href: pkg.location_href.clone(),
                content_type: "rpm".to_string(),
                metadata: pkg.metadata_json(),
            })
            .collect();

        let mut files = Vec::new();
        if mirror_mode {
            for rec in &repomd.records {
                files.push(RepositoryFileCandidate {
                    file_category: "metadata".to_string(),
                    file_type: rec.data_type.clone(),
                    sha256: if rec.checksum_type == "sha256" {
                        Some(rec.checksum.clone())
                    } else {
                        None
                    },
                    size_bytes: Some(rec.size),
                    href: rec.location_href.clone(),
                    original_path: rec.location_href.clone(),
                });
            }
            files.push(RepositoryFileCandidate {
                file_category: "metadata".to_string(),
                file_type: "repomd".to_string(),
                sha256: None,
                size_bytes: None,
                href: "repodata/repomd.xml".to_string(),
                original_path: "repodata/repomd.xml".to_string(),
            });
        }

        Ok(FetchCandidatesResult { candidates, files })
    }
}

pub struct RpmPublisher;

#[async_trait]
impl Publisher for RpmPublisher {
    async fn publish(
        &self,
        items: &[PublishItem],
        target_dir: &Path,
        mode: PublishMode,
    ) -> Result<(), PluginError> {
        match mode {
            PublishMode::Mirror => publish_mirror(items, target_dir).await,
            PublishMode::Filtered => publish_filtered(items, target_dir).await,
        }
    }
}

async fn publish_mirror(items: &[PublishItem], target_dir: &Path) -> Result<(), PluginError> {
    for item in items {
        let Some(rel) = &item.original_path else {
            continue;
        };
        let dst = target_dir.join(rel);
        hardlink_or_copy(&item.pool_path, &dst).map_err(|e| PluginError::Publish(e.to_string()))?;
    }
    Ok(())
}

async fn publish_filtered(items: &[PublishItem], target_dir: &Path) -> Result<(), PluginError> {
    let mut packages = Vec::with_capacity(items.len());
    for item in items {
        let first_letter = item
            .name
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or('_');
        let rel = format!("Packages/{first_letter}/{}", item.filename);
        let dst = target_dir.join(&rel);
        hardlink_or_copy(&item.pool_path, &dst).map_err(|e| PluginError::Publish(e.to_string()))?;

        let epoch = item
            .metadata
            .get("epoch")
            .and_then(|v| v.as_str())
            .unwrap_or("0")
            .to_string();
        let (_, version_part, release_part) = version::split_evr(&item.version);
        packages.push(primary::PrimaryPackage {
            name: item.name.clone(),
            arch: item.arch.clone().unwrap_or_default(),
            epoch,
            version: version_part,
            release: release_part,
            checksum: item.sha256.clone(),
            checksum_type: "sha256".to_string(),
            location_href: rel,
            summary: item
                .metadata
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            description: item
                .metadata
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            license: item
                .metadata
                .get("license")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            group: item
                .metadata
                .get("group")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            size_package: item.size_bytes,
            size_installed: 0,
        });
    }

    let primary_xml = primary::write(&packages).map_err(|e| PluginError::Publish(e.to_string()))?;
    let primary_gz = repomd::gzip_compress(&primary_xml).map_err(|e| PluginError::Publish(e.to_string()))?;
    let checksum = sha256_hex(&primary_gz);
    let primary_href = format!("repodata/{checksum}-primary.xml.gz");
    write_file(&target_dir.join(&primary_href), &primary_gz).map_err(|e| PluginError::Publish(e.to_string()))?;

    let record = repomd::record_for("primary", &primary_href, &primary_gz, &primary_xml, unix_now());
    let repomd_data = repomd::RepomdData {
        revision: unix_now().to_string(),
        records: vec![record],
    };
    let repomd_xml = repomd::write(&repomd_data).map_err(|e| PluginError::Publish(e.to_string()))?;
    write_file(&target_dir.join("repodata/repomd.xml"), &repomd_xml)
        .map_err(|e| PluginError::Publish(e.to_string()))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn write_file(path: &PathBuf, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
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

impl<T: RpmTransport> FormatPlugin for RpmPlugin<T> {
    fn content_type(&self) -> &'static str {
        "rpm"
    }

    fn syncer(&self) -> &dyn Syncer {
        self
    }

    fn publisher(&self) -> &dyn Publisher {
        // The syncer and publisher are deliberately separate small
        // structs (`RpmPlugin`, `RpmPublisher`) since publish needs no
        // transport; this impl exists only to satisfy `FormatPlugin`
        // for callers that want one handle for both roles.
        const PUBLISHER: RpmPublisher = RpmPublisher;
        &PUBLISHER
    }

    fn version_ord(&self) -> &dyn VersionOrd {
        &self.version_ord
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_package_evr_formats_with_and_without_epoch() {
        let mut pkg = primary::PrimaryPackage {
            name: "foo".to_string(),
            version: "1.2".to_string(),
            release: "3".to_string(),
            ..Default::default()
        };
        assert_eq!(pkg.evr(), "1.2-3");
        pkg.epoch = "2".to_string();
        assert_eq!(pkg.evr(), "2:1.2-3");
    }

    #[test]
    fn repomd_roundtrip_preserves_primary_record() {
        let data = repomd::RepomdData {
            revision: "123".to_string(),
            records: vec![repomd::RepomdRecord {
                data_type: "primary".to_string(),
                checksum_type: "sha256".to_string(),
                checksum: "a".repeat(64),
                open_checksum: Some("b".repeat(64)),
                location_href: "repodata/abc-primary.xml.gz".to_string(),
                timestamp: 1000,
                size: 10,
                open_size: Some(20),
            }],
        };
        let xml = repomd::write(&data).unwrap();
        let parsed = repomd::parse(&xml).unwrap();
        assert_eq!(parsed.find("primary").unwrap().location_href, "repodata/abc-primary.xml.gz");
    }
}
