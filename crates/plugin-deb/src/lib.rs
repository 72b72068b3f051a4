//! DEB format plugin: parses `InRelease`/`Release` + per-component
//! `Packages` indexes into candidates, compares Debian versions, and
//! publishes filtered or mirrored repository layouts.

pub mod packages;
pub mod paragraph;
pub mod release;
pub mod version;

use std::path::Path;

use async_trait::async_trait;
use packmirror_plugin_api::{
    AuthContext, Candidate, FetchCandidatesResult, FormatPlugin, PluginError, Publisher, PublishItem,
    PublishMode, RepositoryFileCandidate, Syncer, VersionOrd,
};

pub use version::DebVersionOrd;

#[derive(Debug, thiserror::Error)]
pub enum DebPluginError {
    #[error("failed to parse Release/Packages document: {0}")]
    Parse(String),
}

/// The single distribution (`dists/<codename>`) this sync targets, plus
/// the components this config selects (empty = all listed).
#[derive(Debug, Clone)]
pub struct DebRepoConfig {
    pub distribution: String,
    pub components: Vec<String>,
}

#[async_trait]
pub trait DebTransport: Send + Sync {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, PluginError>;
    async fn get_bytes_optional(&self, relative_path: &str) -> Option<Vec<u8>>;
}

pub struct DebPlugin<T: DebTransport> {
    transport: T,
    config: DebRepoConfig,
    version_ord: DebVersionOrd,
    publisher: DebPublisher,
}

impl<T: DebTransport> DebPlugin<T> {
    pub fn new(transport: T, config: DebRepoConfig) -> Self {
        let publisher = DebPublisher {
            distribution: config.distribution.clone(),
        };
        Self {
            transport,
            config,
            version_ord: DebVersionOrd,
            publisher,
        }
    }

    fn decompress(path: &str, bytes: Vec<u8>) -> Result<Vec<u8>, PluginError> {
        use std::io::Read;
        if path.ends_with(".gz") {
            let mut decoder = flate2::read::GzDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| PluginError::Parse(e.to_string()))?;
            Ok(out)
        } else if path.ends_with(".xz") {
            let mut decoder = xz2::read::XzDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| PluginError::Parse(e.to_string()))?;
            Ok(out)
        } else {
            Ok(bytes)
        }
    }
}

#[async_trait]
impl<T: DebTransport> Syncer for DebPlugin<T> {
    async fn fetch_candidates(
        &self,
        _feed_url: &str,
        _auth: &AuthContext,
        mirror_mode: bool,
    ) -> Result<FetchCandidatesResult, PluginError> {
        let dist = &self.config.distribution;
        let in_release_path = format!("dists/{dist}/InRelease");
        let release_text = if let Some(bytes) = self.transport.get_bytes_optional(&in_release_path).await {
            String::from_utf8_lossy(&bytes).to_string()
        } else {
            let release_path = format!("dists/{dist}/Release");
            let bytes = self.transport.get_bytes(&release_path).await?;
            String::from_utf8_lossy(&bytes).to_string()
        };
        let release = release::parse(&release_text).map_err(|e| PluginError::Parse(e.to_string()))?;

        let components: Vec<String> = if self.config.components.is_empty() {
            release.components.clone()
        } else {
            self.config.components.clone()
        };

        let mut candidates = Vec::new();
        for component in &components {
            for arch in &release.architectures {
                let base = format!("{component}/binary-{arch}");
                let candidates_paths = [
                    format!("dists/{dist}/{base}/Packages.xz"),
                    format!("dists/{dist}/{base}/Packages.gz"),
                ];
                let mut fetched = None;
                for path in &candidates_paths {
                    if let Some(bytes) = self.transport.get_bytes_optional(path).await {
                        fetched = Some((path.clone(), bytes));
                        break;
                    }
                }
                let Some((path, bytes)) = fetched else { continue };
                let decompressed = Self::decompress(&path, bytes)?;
                let text = String::from_utf8_lossy(&decompressed).to_string();
                for pkg in packages::parse(&text) {
                    candidates.push(Candidate {
                        name: pkg.package.clone(),
                        version: pkg.version.clone(),
                        arch: Some(pkg.architecture.clone()),
                        sha256: if pkg.sha256.is_empty() { None } else { Some(pkg.sha256.clone()) },
                        size_bytes: Some(pkg.size),
                        href: pkg.filename.clone(),
                        content_type: "deb".to_string(),
                        metadata: pkg.metadata_json(),
                    });
                }
            }
        }

        let mut files = Vec::new();
        if mirror_mode {
            for entry in &release.entries {
                files.push(RepositoryFileCandidate {
                    file_category: "metadata".to_string(),
                    file_type: "release-member".to_string(),
                    sha256: Some(entry.sha256.clone()),
                    size_bytes: Some(entry.size),
                    href: format!("dists/{dist}/{}", entry.path),
                    original_path: format!("dists/{dist}/{}", entry.path),
                });
            }
            files.push(RepositoryFileCandidate {
                file_category: "metadata".to_string(),
                file_type: "release".to_string(),
                sha256: None,
                size_bytes: None,
                href: in_release_path.clone(),
                original_path: in_release_path,
            });
        }

        Ok(FetchCandidatesResult { candidates, files })
    }
}

pub struct DebPublisher {
    pub distribution: String,
}

#[async_trait]
impl Publisher for DebPublisher {
    async fn publish(
        &self,
        items: &[PublishItem],
        target_dir: &Path,
        mode: PublishMode,
    ) -> Result<(), PluginError> {
        match mode {
            PublishMode::Mirror => self.publish_mirror(items, target_dir),
            PublishMode::Filtered => self.publish_filtered(items, target_dir),
        }
    }
}

impl DebPublisher {
    fn publish_mirror(&self, items: &[PublishItem], target_dir: &Path) -> Result<(), PluginError> {
        for item in items {
            let Some(rel) = &item.original_path else { continue };
            hardlink_or_copy(&item.pool_path, &target_dir.join(rel))
                .map_err(|e| PluginError::Publish(e.to_string()))?;
        }
        Ok(())
    }

    fn publish_filtered(&self, items: &[PublishItem], target_dir: &Path) -> Result<(), PluginError> {
        use std::collections::BTreeMap;
        let mut by_component_arch: BTreeMap<(String, String), Vec<packages::DebPackage>> = BTreeMap::new();

        for item in items {
            let component = item
                .metadata
                .get("section")
                .and_then(|v| v.as_str())
                .map(|s| s.split('/').next().unwrap_or("main").to_string())
                .unwrap_or_else(|| "main".to_string());
            let arch = item.arch.clone().unwrap_or_default();
            let source = first_letter_or_lib(&item.name);
            let rel = format!("pool/{component}/{source}/{}/{}", item.name, item.filename);
            hardlink_or_copy(&item.pool_path, &target_dir.join(&rel))
                .map_err(|e| PluginError::Publish(e.to_string()))?;

            by_component_arch
                .entry((component, arch.clone()))
                .or_default()
                .push(packages::DebPackage {
                    package: item.name.clone(),
                    version: item.version.clone(),
                    architecture: arch,
                    filename: rel,
                    sha256: item.sha256.clone(),
                    size: item.size_bytes,
                    section: item
                        .metadata
                        .get("section")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    priority: item
                        .metadata
                        .get("priority")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    maintainer: item
                        .metadata
                        .get("maintainer")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    depends: item
                        .metadata
                        .get("depends")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
        }

        let mut entries = Vec::new();
        let mut components = Vec::new();
        let mut architectures = Vec::new();
        for ((component, arch), pkgs) in &by_component_arch {
            if !components.contains(component) {
                components.push(component.clone());
            }
            if !architectures.contains(arch) {
                architectures.push(arch.clone());
            }
            let mut text = String::new();
            for pkg in pkgs {
                text.push_str(&packages::write_entry(pkg));
            }
            let path = format!("{component}/binary-{arch}/Packages");
            let bytes = text.into_bytes();
            write_file(&target_dir.join(&path), &bytes).map_err(|e| PluginError::Publish(e.to_string()))?;
            entries.push(release::ReleaseEntry {
                sha256: sha256_hex(&bytes),
                size: bytes.len() as u64,
                path,
            });

            let gz = gzip(&bytes).map_err(|e| PluginError::Publish(e.to_string()))?;
            let gz_path = format!("{component}/binary-{arch}/Packages.gz");
            write_file(&target_dir.join(&gz_path), &gz).map_err(|e| PluginError::Publish(e.to_string()))?;
            entries.push(release::ReleaseEntry {
                sha256: sha256_hex(&gz),
                size: gz.len() as u64,
                path: gz_path,
            });
        }

        let release_text = release::write(&self.distribution, &components, &architectures, &entries);
        write_file(&target_dir.join("Release"), release_text.as_bytes())
            .map_err(|e| PluginError::Publish(e.to_string()))?;
        Ok(())
    }
}

fn first_letter_or_lib(name: &str) -> String {
    if name.starts_with("lib") && name.len() > 3 {
        name[..4].to_string()
    } else {
        name.chars().next().map(|c| c.to_string()).unwrap_or_default()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
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

impl<T: DebTransport> FormatPlugin for DebPlugin<T> {
    fn content_type(&self) -> &'static str {
        "deb"
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
    fn source_bucket_handles_lib_prefix() {
        assert_eq!(first_letter_or_lib("libssl"), "libs");
        assert_eq!(first_letter_or_lib("curl"), "c");
    }
}
