//! Relational metadata store: repositories, content items, snapshots,
//! views, and sync history, backed by SQLite (`rusqlite`).
//!
//! A single [`MetaStore`] owns one connection behind a mutex: the store
//! enforces the single-logical-writer contract itself rather than
//! relying on callers to serialize, matching the pool's own coarse
//! locking for its add-vs-cleanup race.

pub mod models;
mod schema;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub use models::*;

#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid metadata JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate snapshot name {name:?} for repository {repository_id:?}")]
    DuplicateSnapshotName { repository_id: String, name: String },
    #[error("duplicate view-snapshot name {name:?} for view {view_name:?}")]
    DuplicateViewSnapshotName { view_name: String, name: String },
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(i64),
}

impl packmirror_errors::Classify for MetaStoreError {
    fn kind(&self) -> packmirror_errors::ErrorKind {
        match self {
            MetaStoreError::DuplicateSnapshotName { .. }
            | MetaStoreError::DuplicateViewSnapshotName { .. } => {
                packmirror_errors::ErrorKind::DbConstraintViolation
            }
            _ => packmirror_errors::ErrorKind::DbConstraintViolation,
        }
    }
}

type Result<T> = std::result::Result<T, MetaStoreError>;

pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<i64> {
        schema::current_version(&self.conn.lock().unwrap())
    }

    pub fn upgrade_schema(&self) -> Result<i64> {
        schema::upgrade(&self.conn.lock().unwrap())
    }

    // ---- repository -----------------------------------------------------

    pub fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO repository (id, name, repo_type, feed_url, enabled, mode, last_sync_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                repo_type = excluded.repo_type,
                feed_url = excluded.feed_url,
                enabled = excluded.enabled,
                mode = excluded.mode",
            params![
                repo.id,
                repo.name,
                repo.repo_type,
                repo.feed_url,
                repo.enabled,
                repo.mode.as_str(),
                repo.last_sync_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, repo_type, feed_url, enabled, mode, last_sync_at FROM repository WHERE id = ?1",
            [id],
            row_to_repository,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, repo_type, feed_url, enabled, mode, last_sync_at FROM repository ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_repository)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn mark_synced(&self, repo_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE repository SET last_sync_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), repo_id],
        )?;
        Ok(())
    }

    // ---- content items ----------------------------------------------------

    /// Inserts the item if its sha256 isn't already known, otherwise
    /// returns the existing row untouched (content items are immutable
    /// after creation). Returns `(item, created)`.
    pub fn upsert_content_item(&self, new: &NewContentItem) -> Result<(ContentItem, bool)> {
        let conn = self.conn.lock().unwrap();
        if let Some(existing) = query_content_by_sha(&conn, &new.sha256)? {
            return Ok((existing, false));
        }
        let now = Utc::now();
        conn.execute(
            "INSERT INTO content_item (sha256, filename, size_bytes, content_type, name, version, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.sha256,
                new.filename,
                new.size_bytes,
                new.content_type,
                new.name,
                new.version,
                new.metadata.to_string(),
                now.to_rfc3339(),
            ],
        )?;
        let item = query_content_by_sha(&conn, &new.sha256)?.expect("just inserted");
        Ok((item, true))
    }

    pub fn content_item_by_sha256(&self, sha256: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        query_content_by_sha(&conn, sha256)
    }

    pub fn link_repository_content(&self, repository_id: &str, content_item_ids: &[i64]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for id in content_item_ids {
            tx.execute(
                "INSERT OR IGNORE INTO repository_content (repository_id, content_item_id) VALUES (?1, ?2)",
                params![repository_id, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn unlink_repository_content(&self, repository_id: &str, content_item_ids: &[i64]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for id in content_item_ids {
            tx.execute(
                "DELETE FROM repository_content WHERE repository_id = ?1 AND content_item_id = ?2",
                params![repository_id, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_repository_content(&self, repository_id: &str) -> Result<Vec<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ci.id, ci.sha256, ci.filename, ci.size_bytes, ci.content_type, ci.name, ci.version, ci.metadata, ci.created_at
             FROM content_item ci
             JOIN repository_content rc ON rc.content_item_id = ci.id
             WHERE rc.repository_id = ?1
             ORDER BY ci.name, ci.version",
        )?;
        let rows = stmt.query_map([repository_id], row_to_content_item)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Every live sha256 referenced by at least one repository, snapshot,
    /// view-snapshot, or repository-file link. Feeds `Pool::cleanup`.
    pub fn live_sha256s(&self) -> Result<std::collections::HashSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut set = std::collections::HashSet::new();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ci.sha256 FROM content_item ci
             WHERE ci.id IN (SELECT content_item_id FROM repository_content)
                OR ci.id IN (SELECT content_item_id FROM snapshot_content)",
        )?;
        for row in stmt.query_map([], |r| r.get::<_, String>(0))? {
            set.insert(row?);
        }
        let mut stmt2 = conn.prepare("SELECT sha256 FROM repository_file")?;
        for row in stmt2.query_map([], |r| r.get::<_, String>(0))? {
            set.insert(row?);
        }
        Ok(set)
    }

    // ---- repository files (mirror mode) ------------------------------------

    pub fn upsert_repository_file(&self, repository_id: &str, new: &NewRepositoryFile) -> Result<RepositoryFile> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO repository_file (repository_id, file_category, file_type, sha256, size_bytes, original_path, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(repository_id, original_path) DO UPDATE SET
                file_category = excluded.file_category,
                file_type = excluded.file_type,
                sha256 = excluded.sha256,
                size_bytes = excluded.size_bytes,
                metadata = excluded.metadata",
            params![
                repository_id,
                new.file_category,
                new.file_type,
                new.sha256,
                new.size_bytes,
                new.original_path,
                new.metadata.to_string(),
            ],
        )?;
        conn.query_row(
            "SELECT id, repository_id, file_category, file_type, sha256, size_bytes, original_path, metadata
             FROM repository_file WHERE repository_id = ?1 AND original_path = ?2",
            params![repository_id, new.original_path],
            row_to_repository_file,
        )
        .map_err(Into::into)
    }

    pub fn list_repository_files(&self, repository_id: &str) -> Result<Vec<RepositoryFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, repository_id, file_category, file_type, sha256, size_bytes, original_path, metadata
             FROM repository_file WHERE repository_id = ?1 ORDER BY original_path",
        )?;
        let rows = stmt.query_map([repository_id], row_to_repository_file)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ---- snapshots ----------------------------------------------------------

    pub fn create_snapshot(
        &self,
        repository_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Snapshot> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM snapshot WHERE repository_id = ?1 AND name = ?2",
                params![repository_id, name],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(MetaStoreError::DuplicateSnapshotName {
                repository_id: repository_id.to_string(),
                name: name.to_string(),
            });
        }
        let items: Vec<(i64, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT ci.id, ci.size_bytes FROM content_item ci
                 JOIN repository_content rc ON rc.content_item_id = ci.id
                 WHERE rc.repository_id = ?1",
            )?;
            stmt.query_map([repository_id], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        let package_count = items.len() as i64;
        let total_size_bytes: i64 = items.iter().map(|(_, s)| s).sum();
        let now = Utc::now();
        tx.execute(
            "INSERT INTO snapshot (repository_id, name, description, created_at, package_count, total_size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![repository_id, name, description, now.to_rfc3339(), package_count, total_size_bytes],
        )?;
        let snapshot_id = tx.last_insert_rowid();
        for (content_item_id, _) in &items {
            tx.execute(
                "INSERT INTO snapshot_content (snapshot_id, content_item_id) VALUES (?1, ?2)",
                params![snapshot_id, content_item_id],
            )?;
        }
        tx.commit()?;
        Ok(Snapshot {
            id: snapshot_id,
            repository_id: repository_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            package_count,
            total_size_bytes,
        })
    }

    /// Creates a new snapshot linking the exact same content items as
    /// `src_name` — no pool or content_item writes, only new snapshot
    /// and snapshot_content rows.
    pub fn copy_snapshot(&self, repository_id: &str, src_name: &str, dst_name: &str) -> Result<Snapshot> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let src_id: i64 = tx
            .query_row(
                "SELECT id FROM snapshot WHERE repository_id = ?1 AND name = ?2",
                params![repository_id, src_name],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| MetaStoreError::SnapshotNotFound(-1))?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM snapshot WHERE repository_id = ?1 AND name = ?2",
                params![repository_id, dst_name],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(MetaStoreError::DuplicateSnapshotName {
                repository_id: repository_id.to_string(),
                name: dst_name.to_string(),
            });
        }
        let (package_count, total_size_bytes): (i64, i64) = tx.query_row(
            "SELECT package_count, total_size_bytes FROM snapshot WHERE id = ?1",
            [src_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO snapshot (repository_id, name, description, created_at, package_count, total_size_bytes)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
            params![repository_id, dst_name, now.to_rfc3339(), package_count, total_size_bytes],
        )?;
        let dst_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO snapshot_content (snapshot_id, content_item_id)
             SELECT ?1, content_item_id FROM snapshot_content WHERE snapshot_id = ?2",
            params![dst_id, src_id],
        )?;
        tx.commit()?;
        Ok(Snapshot {
            id: dst_id,
            repository_id: repository_id.to_string(),
            name: dst_name.to_string(),
            description: None,
            created_at: now,
            package_count,
            total_size_bytes,
        })
    }

    pub fn get_snapshot(&self, repository_id: &str, name: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, repository_id, name, description, created_at, package_count, total_size_bytes
             FROM snapshot WHERE repository_id = ?1 AND name = ?2",
            params![repository_id, name],
            row_to_snapshot,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_snapshots(&self, repository_id: &str) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, repository_id, name, description, created_at, package_count, total_size_bytes
             FROM snapshot WHERE repository_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([repository_id], row_to_snapshot)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn list_snapshot_content(&self, snapshot_id: i64) -> Result<Vec<ContentItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ci.id, ci.sha256, ci.filename, ci.size_bytes, ci.content_type, ci.name, ci.version, ci.metadata, ci.created_at
             FROM content_item ci
             JOIN snapshot_content sc ON sc.content_item_id = ci.id
             WHERE sc.snapshot_id = ?1
             ORDER BY ci.name, ci.version",
        )?;
        let rows = stmt.query_map([snapshot_id], row_to_content_item)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn delete_snapshot(&self, repository_id: &str, name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM snapshot WHERE repository_id = ?1 AND name = ?2",
            params![repository_id, name],
        )?;
        Ok(())
    }

    /// Diffs two snapshots by `(name, arch)` identity, where `arch` is
    /// read out of each item's metadata map under the key `"arch"`
    /// (absent -> empty string, treated as a single architecture class).
    pub fn diff_snapshots(&self, a_id: i64, b_id: i64) -> Result<SnapshotDiff> {
        let a = self.list_snapshot_content(a_id)?;
        let b = self.list_snapshot_content(b_id)?;
        diff_item_sets(&a, &b)
    }

    // ---- view snapshots -------------------------------------------------------

    /// Creates one snapshot named `name` per member repository and
    /// bundles them into a `ViewSnapshot`, all inside a single
    /// transaction: if any member snapshot fails (e.g. a name
    /// collision), the whole operation rolls back and no partial
    /// member snapshots remain. `members` is `(repository_id,
    /// description)` pairs in view order.
    pub fn create_view_snapshot_with_members(
        &self,
        view_name: &str,
        name: &str,
        members: &[(String, Option<String>)],
    ) -> Result<ViewSnapshot> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let view_exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM view_snapshot WHERE view_name = ?1 AND name = ?2",
                params![view_name, name],
                |r| r.get(0),
            )
            .optional()?;
        if view_exists.is_some() {
            return Err(MetaStoreError::DuplicateViewSnapshotName {
                view_name: view_name.to_string(),
                name: name.to_string(),
            });
        }

        let mut resolved = Vec::with_capacity(members.len());
        let mut package_count = 0i64;
        let mut total_size_bytes = 0i64;
        for (repository_id, description) in members {
            let snap_exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM snapshot WHERE repository_id = ?1 AND name = ?2",
                    params![repository_id, name],
                    |r| r.get(0),
                )
                .optional()?;
            if snap_exists.is_some() {
                return Err(MetaStoreError::DuplicateSnapshotName {
                    repository_id: repository_id.clone(),
                    name: name.to_string(),
                });
            }
            let items: Vec<(i64, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT ci.id, ci.size_bytes FROM content_item ci
                     JOIN repository_content rc ON rc.content_item_id = ci.id
                     WHERE rc.repository_id = ?1",
                )?;
                stmt.query_map([repository_id], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            let snap_package_count = items.len() as i64;
            let snap_total_size_bytes: i64 = items.iter().map(|(_, s)| s).sum();
            let now = Utc::now();
            tx.execute(
                "INSERT INTO snapshot (repository_id, name, description, created_at, package_count, total_size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![repository_id, name, description, now.to_rfc3339(), snap_package_count, snap_total_size_bytes],
            )?;
            let snapshot_id = tx.last_insert_rowid();
            for (content_item_id, _) in &items {
                tx.execute(
                    "INSERT INTO snapshot_content (snapshot_id, content_item_id) VALUES (?1, ?2)",
                    params![snapshot_id, content_item_id],
                )?;
            }
            resolved.push((repository_id.clone(), snapshot_id));
            package_count += snap_package_count;
            total_size_bytes += snap_total_size_bytes;
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO view_snapshot (view_name, name, created_at, package_count, total_size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![view_name, name, now.to_rfc3339(), package_count, total_size_bytes],
        )?;
        let view_snapshot_id = tx.last_insert_rowid();
        for (position, (repo_id, snap_id)) in resolved.iter().enumerate() {
            tx.execute(
                "INSERT INTO view_snapshot_member (view_snapshot_id, position, repository_id, snapshot_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![view_snapshot_id, position as i64, repo_id, snap_id],
            )?;
        }
        tx.commit()?;
        Ok(ViewSnapshot {
            id: view_snapshot_id,
            view_name: view_name.to_string(),
            name: name.to_string(),
            created_at: now,
            package_count,
            total_size_bytes,
            members: resolved,
        })
    }

    /// Bundles one snapshot per member repository into a single
    /// atomic `ViewSnapshot`. `members` is `(repository_id, snapshot_name)`
    /// pairs in view order; every named snapshot must already exist.
    pub fn create_view_snapshot(
        &self,
        view_name: &str,
        name: &str,
        members: &[(String, String)],
    ) -> Result<ViewSnapshot> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM view_snapshot WHERE view_name = ?1 AND name = ?2",
                params![view_name, name],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(MetaStoreError::DuplicateViewSnapshotName {
                view_name: view_name.to_string(),
                name: name.to_string(),
            });
        }
        let mut resolved = Vec::with_capacity(members.len());
        let mut package_count = 0i64;
        let mut total_size_bytes = 0i64;
        for (repo_id, snap_name) in members {
            let (snap_id, pc, ts): (i64, i64, i64) = tx
                .query_row(
                    "SELECT id, package_count, total_size_bytes FROM snapshot WHERE repository_id = ?1 AND name = ?2",
                    params![repo_id, snap_name],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?
                .ok_or_else(|| MetaStoreError::SnapshotNotFound(-1))?;
            resolved.push((repo_id.clone(), snap_id));
            package_count += pc;
            total_size_bytes += ts;
        }
        let now = Utc::now();
        tx.execute(
            "INSERT INTO view_snapshot (view_name, name, created_at, package_count, total_size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![view_name, name, now.to_rfc3339(), package_count, total_size_bytes],
        )?;
        let view_snapshot_id = tx.last_insert_rowid();
        for (position, (repo_id, snap_id)) in resolved.iter().enumerate() {
            tx.execute(
                "INSERT INTO view_snapshot_member (view_snapshot_id, position, repository_id, snapshot_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![view_snapshot_id, position as i64, repo_id, snap_id],
            )?;
        }
        tx.commit()?;
        Ok(ViewSnapshot {
            id: view_snapshot_id,
            view_name: view_name.to_string(),
            name: name.to_string(),
            created_at: now,
            package_count,
            total_size_bytes,
            members: resolved,
        })
    }

    pub fn get_view_snapshot(&self, view_name: &str, name: &str) -> Result<Option<ViewSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String, String, String, i64, i64)> = conn
            .query_row(
                "SELECT id, view_name, name, created_at, package_count, total_size_bytes
                 FROM view_snapshot WHERE view_name = ?1 AND name = ?2",
                params![view_name, name],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .optional()?;
        let Some((id, view_name, name, created_at, package_count, total_size_bytes)) = row else {
            return Ok(None);
        };
        let mut stmt = conn.prepare(
            "SELECT repository_id, snapshot_id FROM view_snapshot_member WHERE view_snapshot_id = ?1 ORDER BY position",
        )?;
        let members = stmt
            .query_map([id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(ViewSnapshot {
            id,
            view_name,
            name,
            created_at: parse_ts(&created_at),
            package_count,
            total_size_bytes,
            members,
        }))
    }

    // ---- sync runs -----------------------------------------------------------

    pub fn start_sync_run(&self, repository_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sync_run (repository_id, started_at, status) VALUES (?1, ?2, 'running')",
            params![repository_id, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finish_sync_run(
        &self,
        sync_run_id: i64,
        status: SyncStatus,
        downloaded: i64,
        skipped: i64,
        failed: i64,
        bytes_transferred: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sync_run SET completed_at = ?1, status = ?2, downloaded = ?3, skipped = ?4, failed = ?5,
                bytes_transferred = ?6, error_message = ?7 WHERE id = ?8",
            params![
                Utc::now().to_rfc3339(),
                status.as_str(),
                downloaded,
                skipped,
                failed,
                bytes_transferred,
                error_message,
                sync_run_id,
            ],
        )?;
        Ok(())
    }

    pub fn list_sync_runs(&self, repository_id: &str) -> Result<Vec<SyncRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, repository_id, started_at, completed_at, status, downloaded, skipped, failed, bytes_transferred, error_message
             FROM sync_run WHERE repository_id = ?1 ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map([repository_id], row_to_sync_run)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

fn diff_item_sets(a: &[ContentItem], b: &[ContentItem]) -> Result<SnapshotDiff> {
    use std::collections::HashMap;
    let key = |i: &ContentItem| -> String {
        let arch = i.metadata.get("arch").and_then(|v| v.as_str()).unwrap_or("");
        format!("{}\0{}", i.name, arch)
    };
    let a_by_key: HashMap<String, &ContentItem> = a.iter().map(|i| (key(i), i)).collect();
    let b_by_key: HashMap<String, &ContentItem> = b.iter().map(|i| (key(i), i)).collect();

    let mut diff = SnapshotDiff::default();
    for (k, item) in &b_by_key {
        match a_by_key.get(k) {
            None => diff.added.push(item.name.clone()),
            Some(a_item) if a_item.version != item.version => {
                diff.updated
                    .push((item.name.clone(), a_item.version.clone(), item.version.clone()));
            }
            _ => {}
        }
    }
    for (k, item) in &a_by_key {
        if !b_by_key.contains_key(k) {
            diff.removed.push(item.name.clone());
        }
    }
    Ok(diff)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn query_content_by_sha(conn: &Connection, sha256: &str) -> Result<Option<ContentItem>> {
    conn.query_row(
        "SELECT id, sha256, filename, size_bytes, content_type, name, version, metadata, created_at
         FROM content_item WHERE sha256 = ?1",
        [sha256],
        row_to_content_item,
    )
    .optional()
    .map_err(Into::into)
}

fn row_to_content_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
    let metadata_raw: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(ContentItem {
        id: row.get(0)?,
        sha256: row.get(1)?,
        filename: row.get(2)?,
        size_bytes: row.get(3)?,
        content_type: row.get(4)?,
        name: row.get(5)?,
        version: row.get(6)?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
        created_at: parse_ts(&created_at),
    })
}

fn row_to_repository(row: &rusqlite::Row<'_>) -> rusqlite::Result<Repository> {
    let last_sync_at: Option<String> = row.get(6)?;
    let mode: String = row.get(5)?;
    Ok(Repository {
        id: row.get(0)?,
        name: row.get(1)?,
        repo_type: row.get(2)?,
        feed_url: row.get(3)?,
        enabled: row.get(4)?,
        mode: RepoMode::parse(&mode),
        last_sync_at: last_sync_at.map(|s| parse_ts(&s)),
    })
}

fn row_to_repository_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepositoryFile> {
    let metadata_raw: String = row.get(7)?;
    Ok(RepositoryFile {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        file_category: row.get(2)?,
        file_type: row.get(3)?,
        sha256: row.get(4)?,
        size_bytes: row.get(5)?,
        original_path: row.get(6)?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    let created_at: String = row.get(4)?;
    Ok(Snapshot {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: parse_ts(&created_at),
        package_count: row.get(5)?,
        total_size_bytes: row.get(6)?,
    })
}

fn row_to_sync_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRun> {
    let started_at: String = row.get(2)?;
    let completed_at: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(SyncRun {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        started_at: parse_ts(&started_at),
        completed_at: completed_at.map(|s| parse_ts(&s)),
        status: SyncStatus::parse(&status),
        downloaded: row.get(5)?,
        skipped: row.get(6)?,
        failed: row.get(7)?,
        bytes_transferred: row.get(8)?,
        error_message: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_repo(id: &str) -> MetaStore {
        let store = MetaStore::open_in_memory().unwrap();
        store
            .upsert_repository(&Repository {
                id: id.to_string(),
                name: id.to_string(),
                repo_type: "rpm".to_string(),
                feed_url: "https://example.test/repo".to_string(),
                enabled: true,
                mode: RepoMode::Filtered,
                last_sync_at: None,
            })
            .unwrap();
        store
    }

    fn item(sha: &str, name: &str, version: &str) -> NewContentItem {
        NewContentItem {
            sha256: sha.to_string(),
            filename: format!("{name}-{version}.rpm"),
            size_bytes: 1024,
            content_type: "rpm".to_string(),
            name: name.to_string(),
            version: version.to_string(),
            metadata: json!({"arch": "x86_64"}),
        }
    }

    #[test]
    fn upsert_content_item_is_idempotent_by_sha256() {
        let store = MetaStore::open_in_memory().unwrap();
        let (a, created_a) = store.upsert_content_item(&item("a".repeat(64).as_str(), "pkg", "1.0")).unwrap();
        let (b, created_b) = store.upsert_content_item(&item("a".repeat(64).as_str(), "pkg", "1.0")).unwrap();
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn snapshot_create_then_duplicate_name_fails() {
        let store = store_with_repo("repo-a");
        let (ci, _) = store.upsert_content_item(&item(&"b".repeat(64), "pkg", "1.0")).unwrap();
        store.link_repository_content("repo-a", &[ci.id]).unwrap();
        store.create_snapshot("repo-a", "weekly", None).unwrap();
        let err = store.create_snapshot("repo-a", "weekly", None).unwrap_err();
        assert!(matches!(err, MetaStoreError::DuplicateSnapshotName { .. }));
    }

    #[test]
    fn snapshot_is_immutable_after_further_links() {
        let store = store_with_repo("repo-a");
        let (ci1, _) = store.upsert_content_item(&item(&"c".repeat(64), "pkg", "1.0")).unwrap();
        store.link_repository_content("repo-a", &[ci1.id]).unwrap();
        let snap = store.create_snapshot("repo-a", "s1", None).unwrap();
        let (ci2, _) = store.upsert_content_item(&item(&"d".repeat(64), "pkg2", "2.0")).unwrap();
        store.link_repository_content("repo-a", &[ci2.id]).unwrap();
        let content = store.list_snapshot_content(snap.id).unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].id, ci1.id);
    }

    #[test]
    fn copy_snapshot_links_same_items_without_new_content() {
        let store = store_with_repo("repo-a");
        let (ci, _) = store.upsert_content_item(&item(&"e".repeat(64), "pkg", "1.0")).unwrap();
        store.link_repository_content("repo-a", &[ci.id]).unwrap();
        store.create_snapshot("repo-a", "src", None).unwrap();
        let copy = store.copy_snapshot("repo-a", "src", "dst").unwrap();
        let content = store.list_snapshot_content(copy.id).unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].id, ci.id);
    }

    #[test]
    fn diff_snapshots_detects_added_removed_updated() {
        let store = store_with_repo("repo-a");
        let (ci1, _) = store.upsert_content_item(&item(&"1".repeat(64), "foo", "1.0")).unwrap();
        store.link_repository_content("repo-a", &[ci1.id]).unwrap();
        let a = store.create_snapshot("repo-a", "a", None).unwrap();

        store.unlink_repository_content("repo-a", &[ci1.id]).unwrap();
        let (ci1v2, _) = store.upsert_content_item(&item(&"2".repeat(64), "foo", "2.0")).unwrap();
        let (ci2, _) = store.upsert_content_item(&item(&"3".repeat(64), "bar", "1.0")).unwrap();
        store.link_repository_content("repo-a", &[ci1v2.id, ci2.id]).unwrap();
        let b = store.create_snapshot("repo-a", "b", None).unwrap();

        let diff = store.diff_snapshots(a.id, b.id).unwrap();
        assert_eq!(diff.added, vec!["bar".to_string()]);
        assert!(diff.removed.is_empty());
        assert_eq!(diff.updated, vec![("foo".to_string(), "1.0".to_string(), "2.0".to_string())]);
    }

    #[test]
    fn create_view_snapshot_bundles_members_atomically() {
        let store = MetaStore::open_in_memory().unwrap();
        for repo_id in ["repo-a", "repo-b"] {
            store
                .upsert_repository(&Repository {
                    id: repo_id.to_string(),
                    name: repo_id.to_string(),
                    repo_type: "rpm".to_string(),
                    feed_url: "https://example.test".to_string(),
                    enabled: true,
                    mode: RepoMode::Filtered,
                    last_sync_at: None,
                })
                .unwrap();
            let sha = format!("{repo_id:f<64}");
            let (ci, _) = store.upsert_content_item(&item(&sha, "pkg", "1.0")).unwrap();
            store.link_repository_content(repo_id, &[ci.id]).unwrap();
            store.create_snapshot(repo_id, "weekly", None).unwrap();
        }
        let vs = store
            .create_view_snapshot(
                "combined",
                "weekly",
                &[
                    ("repo-a".to_string(), "weekly".to_string()),
                    ("repo-b".to_string(), "weekly".to_string()),
                ],
            )
            .unwrap();
        assert_eq!(vs.members.len(), 2);
        assert_eq!(vs.package_count, 2);
    }
}
