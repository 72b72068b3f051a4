//! Helm format plugin: parses a chart repository's `index.yaml` into
//! candidates, orders versions by SemVer, and publishes an `index.yaml`
//! plus hardlinked `.tgz` files.

use std::cmp::Ordering;
use std::path::Path;

use async_trait::async_trait;
use packmirror_plugin_api::{
    AuthContext, Candidate, FetchCandidatesResult, FormatPlugin, PluginError, Publisher, PublishItem,
    PublishMode, Syncer, VersionOrd,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum HelmPluginError {
    #[error("failed to parse index.yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Index {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub entries: std::collections::BTreeMap<String, Vec<IndexEntry>>,
    #[serde(default)]
    pub generated: Option<String>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

pub fn parse_index(yaml: &[u8]) -> Result<Index, HelmPluginError> {
    Ok(serde_yaml::from_slice(yaml)?)
}

pub fn write_index(index: &Index) -> Result<Vec<u8>, HelmPluginError> {
    Ok(serde_yaml::to_string(index)?.into_bytes())
}

#[async_trait]
pub trait HelmTransport: Send + Sync {
    async fn get_bytes(&self, relative_path: &str) -> Result<Vec<u8>, PluginError>;
}

pub struct HelmPlugin<T: HelmTransport> {
    transport: T,
    version_ord: HelmVersionOrd,
    publisher: HelmPublisher,
}

impl<T: HelmTransport> HelmPlugin<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            version_ord: HelmVersionOrd,
            publisher: HelmPublisher,
        }
    }
}

#[async_trait]
impl<T: HelmTransport> Syncer for HelmPlugin<T> {
    async fn fetch_candidates(
        &self,
        _feed_url: &str,
        _auth: &AuthContext,
        _mirror_mode: bool,
    ) -> Result<FetchCandidatesResult, PluginError> {
        let bytes = self.transport.get_bytes("index.yaml").await?;
        let index = parse_index(&bytes).map_err(|e| PluginError::Parse(e.to_string()))?;

        let mut candidates = Vec::new();
        for (name, versions) in &index.entries {
            for entry in versions {
                let Some(url) = entry.urls.first() else { continue };
                candidates.push(Candidate {
                    name: name.clone(),
                    version: entry.version.clone(),
                    arch: None,
                    sha256: entry.digest.clone(),
                    size_bytes: None,
                    href: url.clone(),
                    content_type: "helm".to_string(),
                    metadata: json!({
                        "app_version": entry.app_version,
                        "description": entry.description,
                    }),
                });
            }
        }
        // Mirror mode for Helm is a no-op on RepositoryFiles: the chart
        // tarballs themselves are the only upstream artifacts, and
        // `index.yaml` is always regenerated (there is no "keep upstream's
        // index.yaml byte-for-byte" mode worth supporting: its URLs embed
        // this mirror's own layout either way).
        Ok(FetchCandidatesResult {
            candidates,
            files: Vec::new(),
        })
    }
}

pub struct HelmPublisher;

#[async_trait]
impl Publisher for HelmPublisher {
    async fn publish(
        &self,
        items: &[PublishItem],
        target_dir: &Path,
        _mode: PublishMode,
    ) -> Result<(), PluginError> {
        let mut index = Index {
            api_version: "v1".to_string(),
            entries: Default::default(),
            generated: Some(chrono::Utc::now().to_rfc3339()),
        };
        for item in items {
            let dst = target_dir.join(&item.filename);
            hardlink_or_copy(&item.pool_path, &dst).map_err(|e| PluginError::Publish(e.to_string()))?;
            index.entries.entry(item.name.clone()).or_default().push(IndexEntry {
                name: item.name.clone(),
                version: item.version.clone(),
                app_version: item
                    .metadata
                    .get("app_version")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                digest: Some(item.sha256.clone()),
                urls: vec![item.filename.clone()],
                description: item
                    .metadata
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            });
        }
        let yaml = write_index(&index).map_err(|e| PluginError::Publish(e.to_string()))?;
        std::fs::write(target_dir.join("index.yaml"), yaml).map_err(|e| PluginError::Publish(e.to_string()))?;
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

pub struct HelmVersionOrd;

impl VersionOrd for HelmVersionOrd {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match (semver::Version::parse(a.trim_start_matches('v')), semver::Version::parse(b.trim_start_matches('v'))) {
            (Ok(va), Ok(vb)) => va.cmp(&vb),
            _ => a.cmp(b),
        }
    }
}

impl<T: HelmTransport> FormatPlugin for HelmPlugin<T> {
    fn content_type(&self) -> &'static str {
        "helm"
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
    fn semver_ordering_prefers_higher_minor() {
        let ord = HelmVersionOrd;
        assert_eq!(ord.compare("1.2.0", "1.10.0"), Ordering::Less);
    }

    #[test]
    fn index_roundtrips_through_yaml() {
        let mut index = Index::default();
        index.entries.insert(
            "mychart".to_string(),
            vec![IndexEntry {
                name: "mychart".to_string(),
                version: "1.0.0".to_string(),
                app_version: Some("2.0".to_string()),
                digest: Some("a".repeat(64)),
                urls: vec!["mychart-1.0.0.tgz".to_string()],
                description: None,
            }],
        );
        let yaml = write_index(&index).unwrap();
        let parsed = parse_index(&yaml).unwrap();
        assert_eq!(parsed.entries["mychart"][0].version, "1.0.0");
    }
}
