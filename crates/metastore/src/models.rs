use chrono::{DateTime, Utc};
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum RepoMode {
    Filtered,
    Mirror,
}

impl RepoMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoMode::Filtered => "filtered",
            RepoMode::Mirror => "mirror",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "mirror" => RepoMode::Mirror,
            _ => RepoMode::Filtered,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: i64,
    pub sha256: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub name: String,
    pub version: String,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContentItem {
    pub sha256: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub name: String,
    pub version: String,
    pub metadata: Json,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub repo_type: String,
    pub feed_url: String,
    pub enabled: bool,
    pub mode: RepoMode,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RepositoryFile {
    pub id: i64,
    pub repository_id: String,
    pub file_category: String,
    pub file_type: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub original_path: String,
    pub metadata: Json,
}

#[derive(Debug, Clone)]
pub struct NewRepositoryFile {
    pub file_category: String,
    pub file_type: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub original_path: String,
    pub metadata: Json,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: i64,
    pub repository_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub package_count: i64,
    pub total_size_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub id: i64,
    pub view_name: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub package_count: i64,
    pub total_size_bytes: i64,
    /// `(repository_id, snapshot_id)` in view order.
    pub members: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Running,
    Success,
    Failed,
    Partial,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => SyncStatus::Success,
            "failed" => SyncStatus::Failed,
            "partial" => SyncStatus::Partial,
            _ => SyncStatus::Running,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: i64,
    pub repository_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub downloaded: i64,
    pub skipped: i64,
    pub failed: i64,
    pub bytes_transferred: i64,
    pub error_message: Option<String>,
}

/// The three ways an upstream candidate item can relate to what a
/// repository already links, as classified by `SyncEngine` diffing
/// against the pool/metastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffClass {
    /// Already linked to this repository.
    Present,
    /// Exists in the pool (some other repository has it) but not linked here.
    PoolHit,
    /// Not in the pool at all; must be downloaded.
    Need,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<(String, String, String)>,
}
