//! Materializes a repository, snapshot, view, or view-snapshot onto
//! disk by building the pool-relative `PublishItem` list and handing it
//! to the matching format plugin's `Publisher`, under a sibling
//! temp-directory rename so a reader of `target_dir` never observes a
//! half-written tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use packmirror_errors::{Classify, ErrorKind};
use packmirror_metastore::{ContentItem, MetaStore, RepoMode};
use packmirror_plugin_api::{FormatPlugin, PublishItem, PublishMode};
use packmirror_pool::{Pool, Subtree};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    MetaStore(#[from] packmirror_metastore::MetaStoreError),
    #[error(transparent)]
    Plugin(#[from] packmirror_plugin_api::PluginError),
    #[error("repository {0:?} not found")]
    RepositoryNotFound(String),
    #[error("snapshot {1:?} not found for repository {0:?}")]
    SnapshotNotFound(String, String),
    #[error("view snapshot {1:?} not found for view {0:?}")]
    ViewSnapshotNotFound(String, String),
    #[error("no format plugin registered for content type {0:?}")]
    NoPlugin(String),
    #[error("I/O error publishing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Classify for PublishError {
    fn kind(&self) -> ErrorKind {
        match self {
            PublishError::MetaStore(e) => e.kind(),
            PublishError::Plugin(e) => e.kind(),
            PublishError::Io { .. } => ErrorKind::PoolIoFailed,
            _ => ErrorKind::ConfigInvalid,
        }
    }
}

type Result<T> = std::result::Result<T, PublishError>;

/// Maps a plugin's `content_type` tag to the plugin instance that
/// publishes it. Built by the caller (config/CLI layer), which owns
/// the concrete transports each plugin was constructed with.
pub struct PluginRegistry<'a> {
    plugins: HashMap<String, &'a dyn FormatPlugin>,
}

impl<'a> PluginRegistry<'a> {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: &'a dyn FormatPlugin) {
        self.plugins.insert(plugin.content_type().to_string(), plugin);
    }

    fn get(&self, content_type: &str) -> Result<&'a dyn FormatPlugin> {
        self.plugins
            .get(content_type)
            .copied()
            .ok_or_else(|| PublishError::NoPlugin(content_type.to_string()))
    }
}

impl<'a> Default for PluginRegistry<'a> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Publisher {
    metastore: std::sync::Arc<MetaStore>,
    pool: std::sync::Arc<Pool>,
}

impl Publisher {
    pub fn new(metastore: std::sync::Arc<MetaStore>, pool: std::sync::Arc<Pool>) -> Self {
        Self { metastore, pool }
    }

    pub async fn publish_repository(
        &self,
        repository_id: &str,
        target: &Path,
        registry: &PluginRegistry<'_>,
    ) -> Result<()> {
        let repo = self
            .metastore
            .get_repository(repository_id)?
            .ok_or_else(|| PublishError::RepositoryNotFound(repository_id.to_string()))?;
        let plugin = registry.get(&repo.repo_type)?;
        let mode = match repo.mode {
            RepoMode::Mirror => PublishMode::Mirror,
            RepoMode::Filtered => PublishMode::Filtered,
        };
        let items = self.metastore.list_repository_content(repository_id)?;
        let publish_items = self.build_items(&items, mode);
        self.publish_atomic(target, plugin, &publish_items, mode).await
    }

    pub async fn publish_snapshot(
        &self,
        repository_id: &str,
        snapshot_name: &str,
        target: &Path,
        registry: &PluginRegistry<'_>,
    ) -> Result<()> {
        let repo = self
            .metastore
            .get_repository(repository_id)?
            .ok_or_else(|| PublishError::RepositoryNotFound(repository_id.to_string()))?;
        let snapshot = self
            .metastore
            .get_snapshot(repository_id, snapshot_name)?
            .ok_or_else(|| PublishError::SnapshotNotFound(repository_id.to_string(), snapshot_name.to_string()))?;
        let plugin = registry.get(&repo.repo_type)?;
        let mode = match repo.mode {
            RepoMode::Mirror => PublishMode::Mirror,
            RepoMode::Filtered => PublishMode::Filtered,
        };
        let items = self.metastore.list_snapshot_content(snapshot.id)?;
        let publish_items = self.build_items(&items, mode);
        self.publish_atomic(target, plugin, &publish_items, mode).await
    }

    /// Publishes the union of every member repository's currently
    /// linked items, in view order, with no cross-repository
    /// deduplication: a package present in two member repositories is
    /// written (and appears in regenerated metadata) once per
    /// repository, and client-side repository priority is what
    /// resolves the duplicate.
    pub async fn publish_view(
        &self,
        member_repository_ids: &[String],
        target: &Path,
        registry: &PluginRegistry<'_>,
    ) -> Result<()> {
        self.publish_grouped(member_repository_ids, target, registry, |repo_id| {
            self.metastore.list_repository_content(repo_id)
        })
        .await
    }

    pub async fn publish_view_snapshot(
        &self,
        view_name: &str,
        name: &str,
        target: &Path,
        registry: &PluginRegistry<'_>,
    ) -> Result<()> {
        let view_snapshot = self
            .metastore
            .get_view_snapshot(view_name, name)?
            .ok_or_else(|| PublishError::ViewSnapshotNotFound(view_name.to_string(), name.to_string()))?;
        let member_repo_ids: Vec<String> = view_snapshot.members.iter().map(|(r, _)| r.clone()).collect();
        let snapshot_ids: HashMap<String, i64> = view_snapshot.members.into_iter().collect();
        self.publish_grouped(&member_repo_ids, target, registry, |repo_id| {
            let snapshot_id = snapshot_ids[repo_id];
            self.metastore.list_snapshot_content(snapshot_id)
        })
        .await
    }

    async fn publish_grouped(
        &self,
        member_repository_ids: &[String],
        target: &Path,
        registry: &PluginRegistry<'_>,
        fetch_items: impl Fn(&str) -> std::result::Result<Vec<ContentItem>, packmirror_metastore::MetaStoreError>,
    ) -> Result<()> {
        // Every member repository's format plugin writes into the same
        // staged tree before the single atomic rename at the end.
        let staging = sibling_path(target, "tmp");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;

        for repo_id in member_repository_ids {
            let repo = self
                .metastore
                .get_repository(repo_id)?
                .ok_or_else(|| PublishError::RepositoryNotFound(repo_id.clone()))?;
            let plugin = registry.get(&repo.repo_type)?;
            let mode = match repo.mode {
                RepoMode::Mirror => PublishMode::Mirror,
                RepoMode::Filtered => PublishMode::Filtered,
            };
            let items = fetch_items(repo_id)?;
            let publish_items = self.build_items(&items, mode);
            let member_dir = staging.join(repo_id);
            std::fs::create_dir_all(&member_dir).map_err(|e| io_err(&member_dir, e))?;
            plugin.publisher().publish(&publish_items, &member_dir, mode).await?;
        }

        finalize_rename(&staging, target)?;
        info!(target = %target.display(), members = member_repository_ids.len(), "view published");
        Ok(())
    }

    fn build_items(&self, items: &[ContentItem], mode: PublishMode) -> Vec<PublishItem> {
        items
            .iter()
            .map(|item| PublishItem {
                sha256: item.sha256.clone(),
                filename: item.filename.clone(),
                pool_path: self.pool.path_for(&item.sha256, &item.filename, Subtree::Content),
                size_bytes: item.size_bytes as u64,
                name: item.name.clone(),
                version: item.version.clone(),
                arch: item
                    .metadata
                    .get("arch")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                metadata: item.metadata.clone(),
                original_path: matches!(mode, PublishMode::Mirror).then(|| item.filename.clone()),
            })
            .collect()
    }

    async fn publish_atomic(
        &self,
        target: &Path,
        plugin: &dyn FormatPlugin,
        items: &[PublishItem],
        mode: PublishMode,
    ) -> Result<()> {
        let staging = sibling_path(target, "tmp");
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;

        let publish_result = plugin.publisher().publish(items, &staging, mode).await;
        if publish_result.is_err() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        publish_result?;

        finalize_rename(&staging, target)?;
        info!(target = %target.display(), items = items.len(), "repository published");
        Ok(())
    }
}

fn sibling_path(target: &Path, tag: &str) -> PathBuf {
    let pid = std::process::id();
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "published".to_string());
    target
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{name}.{tag}.{pid}"))
}

fn finalize_rename(staging: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        let old = sibling_path(target, "old");
        std::fs::rename(target, &old).map_err(|e| io_err(target, e))?;
        std::fs::rename(staging, target).map_err(|e| io_err(staging, e))?;
        let _ = std::fs::remove_dir_all(&old);
    } else {
        std::fs::rename(staging, target).map_err(|e| io_err(staging, e))?;
    }
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> PublishError {
    PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use packmirror_metastore::{NewContentItem, Repository};
    use packmirror_plugin_api::{AuthContext, FetchCandidatesResult, PluginError, Syncer, VersionOrd};
    use serde_json::json;
    use std::cmp::Ordering;
    use std::sync::Arc;

    struct NoopSyncer;
    #[async_trait]
    impl Syncer for NoopSyncer {
        async fn fetch_candidates(
            &self,
            _feed_url: &str,
            _auth: &AuthContext,
            _mirror_mode: bool,
        ) -> std::result::Result<FetchCandidatesResult, PluginError> {
            Ok(FetchCandidatesResult::default())
        }
    }

    struct LexOrd;
    impl VersionOrd for LexOrd {
        fn compare(&self, a: &str, b: &str) -> Ordering {
            a.cmp(b)
        }
    }

    struct FlatPublisher;
    #[async_trait]
    impl packmirror_plugin_api::Publisher for FlatPublisher {
        async fn publish(
            &self,
            items: &[PublishItem],
            target_dir: &Path,
            _mode: PublishMode,
        ) -> std::result::Result<(), PluginError> {
            for item in items {
                std::fs::write(target_dir.join(&item.filename), b"x")
                    .map_err(|e| PluginError::Publish(e.to_string()))?;
            }
            Ok(())
        }
    }

    struct TestPlugin {
        syncer: NoopSyncer,
        publisher: FlatPublisher,
        version_ord: LexOrd,
    }
    impl FormatPlugin for TestPlugin {
        fn content_type(&self) -> &'static str {
            "rpm"
        }
        fn syncer(&self) -> &dyn Syncer {
            &self.syncer
        }
        fn publisher(&self) -> &dyn packmirror_plugin_api::Publisher {
            &self.publisher
        }
        fn version_ord(&self) -> &dyn VersionOrd {
            &self.version_ord
        }
    }

    #[tokio::test]
    async fn publish_repository_writes_into_target_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = Arc::new(Pool::open(tmp.path().join("pool")).unwrap());
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        store
            .upsert_repository(&Repository {
                id: "repo1".to_string(),
                name: "repo1".to_string(),
                repo_type: "rpm".to_string(),
                feed_url: "https://example.com".to_string(),
                enabled: true,
                mode: RepoMode::Filtered,
                last_sync_at: None,
            })
            .unwrap();
        let sha = "a".repeat(64);
        pool.add_reader(b"hello".as_slice(), "pkg-1.0.rpm", Subtree::Content, None)
            .unwrap();
        let (item, _) = store
            .upsert_content_item(&NewContentItem {
                sha256: sha.clone(),
                filename: "pkg-1.0.rpm".to_string(),
                size_bytes: 5,
                content_type: "rpm".to_string(),
                name: "pkg".to_string(),
                version: "1.0".to_string(),
                metadata: json!({}),
            })
            .unwrap();
        store.link_repository_content("repo1", &[item.id]).unwrap();

        let plugin = TestPlugin {
            syncer: NoopSyncer,
            publisher: FlatPublisher,
            version_ord: LexOrd,
        };
        let mut registry = PluginRegistry::new();
        registry.register(&plugin);

        let publisher = Publisher::new(store, pool);
        let target = tmp.path().join("published").join("repo1");
        publisher.publish_repository("repo1", &target, &registry).await.unwrap();

        assert!(target.join("pkg-1.0.rpm").exists());
    }
}
