//! Thin orchestration over the metastore's snapshot tables. Creating or
//! copying a snapshot touches no pool object: every `ContentItem` a
//! snapshot links already lives in the pool under its `sha256`, so
//! "snapshotting" a repository is nothing more than freezing the
//! current `repository_content` links into a named row.

use std::sync::Arc;

use packmirror_errors::{Classify, ErrorKind};
use packmirror_metastore::{MetaStore, Snapshot, SnapshotDiff, ViewSnapshot};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    MetaStore(#[from] packmirror_metastore::MetaStoreError),
}

impl Classify for SnapshotError {
    fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::MetaStore(e) => e.kind(),
        }
    }
}

type Result<T> = std::result::Result<T, SnapshotError>;

pub struct SnapshotManager {
    metastore: Arc<MetaStore>,
}

impl SnapshotManager {
    pub fn new(metastore: Arc<MetaStore>) -> Self {
        Self { metastore }
    }

    pub fn create(&self, repository_id: &str, name: &str, description: Option<&str>) -> Result<Snapshot> {
        let snapshot = self.metastore.create_snapshot(repository_id, name, description)?;
        info!(repository_id, name, package_count = snapshot.package_count, "snapshot created");
        Ok(snapshot)
    }

    pub fn copy(&self, repository_id: &str, src_name: &str, dst_name: &str) -> Result<Snapshot> {
        let snapshot = self.metastore.copy_snapshot(repository_id, src_name, dst_name)?;
        info!(repository_id, src_name, dst_name, "snapshot copied");
        Ok(snapshot)
    }

    pub fn get(&self, repository_id: &str, name: &str) -> Result<Option<Snapshot>> {
        Ok(self.metastore.get_snapshot(repository_id, name)?)
    }

    pub fn list(&self, repository_id: &str) -> Result<Vec<Snapshot>> {
        Ok(self.metastore.list_snapshots(repository_id)?)
    }

    pub fn content(&self, snapshot_id: i64) -> Result<Vec<packmirror_metastore::ContentItem>> {
        Ok(self.metastore.list_snapshot_content(snapshot_id)?)
    }

    pub fn delete(&self, repository_id: &str, name: &str) -> Result<()> {
        self.metastore.delete_snapshot(repository_id, name)?;
        info!(repository_id, name, "snapshot deleted");
        Ok(())
    }

    pub fn diff(&self, a_id: i64, b_id: i64) -> Result<SnapshotDiff> {
        Ok(self.metastore.diff_snapshots(a_id, b_id)?)
    }

    /// Creates one snapshot named `name` per member, then bundles them
    /// into a `ViewSnapshot`. `members` is `(repository_id, description)`
    /// pairs in view order; the whole operation runs inside a single
    /// metastore transaction, so if any member snapshot fails (e.g. a
    /// name collision), no partial member snapshots are left behind.
    pub fn create_view_snapshot(
        &self,
        view_name: &str,
        name: &str,
        members: &[(String, Option<String>)],
    ) -> Result<ViewSnapshot> {
        let bundled = self.metastore.create_view_snapshot_with_members(view_name, name, members)?;
        info!(view_name, name, members = bundled.members.len(), "view snapshot created");
        Ok(bundled)
    }

    pub fn get_view_snapshot(&self, view_name: &str, name: &str) -> Result<Option<ViewSnapshot>> {
        Ok(self.metastore.get_view_snapshot(view_name, name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packmirror_metastore::{NewContentItem, Repository, RepoMode};
    use serde_json::json;

    fn setup() -> (Arc<MetaStore>, SnapshotManager) {
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
        let (item, _) = store
            .upsert_content_item(&NewContentItem {
                sha256: "a".repeat(64),
                filename: "pkg-1.0.rpm".to_string(),
                size_bytes: 10,
                content_type: "rpm".to_string(),
                name: "pkg".to_string(),
                version: "1.0".to_string(),
                metadata: json!({}),
            })
            .unwrap();
        store.link_repository_content("repo1", &[item.id]).unwrap();
        let manager = SnapshotManager::new(store.clone());
        (store, manager)
    }

    #[test]
    fn create_snapshot_captures_current_links() {
        let (_store, manager) = setup();
        let snap = manager.create("repo1", "v1", None).unwrap();
        assert_eq!(snap.package_count, 1);
    }

    #[test]
    fn copy_creates_independent_named_snapshot() {
        let (_store, manager) = setup();
        manager.create("repo1", "v1", None).unwrap();
        let copy = manager.copy("repo1", "v1", "v1-copy").unwrap();
        assert_eq!(copy.package_count, 1);
        assert!(manager.get("repo1", "v1-copy").unwrap().is_some());
    }

    #[test]
    fn delete_removes_named_snapshot_but_keeps_content_items() {
        let (store, manager) = setup();
        manager.create("repo1", "v1", None).unwrap();
        manager.delete("repo1", "v1").unwrap();
        assert!(manager.get("repo1", "v1").unwrap().is_none());
        assert!(store.content_item_by_sha256(&"a".repeat(64)).unwrap().is_some());
    }
}
