//! Shared contract every format plugin (RPM, DEB, Helm, APK) implements:
//! a [`Syncer`] that turns an upstream feed into a flat candidate list,
//! a [`VersionOrd`] comparator used by the filter engine and
//! snapshot-diff, and a [`Publisher`] that materializes linked items
//! into a format-correct on-disk layout.
//!
//! Deliberately a small trait surface rather than a deep class
//! hierarchy: every format satisfies the same three capabilities, and
//! nothing else is shared between them.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value as Json;

// Plugins stay decoupled from `packmirror-pool`'s and `packmirror-fetcher`'s
// concrete error types; `sync`/`publish` convert those into `PluginError`
// at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("failed to parse upstream metadata: {0}")]
    Parse(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

impl packmirror_errors::Classify for PluginError {
    fn kind(&self) -> packmirror_errors::ErrorKind {
        match self {
            PluginError::Parse(_) => packmirror_errors::ErrorKind::UpstreamParseError,
            PluginError::Fetch(_) => packmirror_errors::ErrorKind::FetchFailed,
            PluginError::Publish(_) => packmirror_errors::ErrorKind::PoolIoFailed,
        }
    }
}

/// One upstream package/chart/artifact, as produced by a plugin's
/// `FetchCandidates`. `href` is resolved against the repository's feed
/// URL by the sync engine before the fetcher is invoked.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub version: String,
    pub arch: Option<String>,
    pub sha256: Option<String>,
    pub size_bytes: Option<u64>,
    pub href: String,
    pub content_type: String,
    /// Type-specific fields (license, summary, depends, …), validated by
    /// the plugin's own schema before it ever reaches here.
    pub metadata: Json,
}

/// One non-package upstream file (mirror mode only): repodata,
/// signatures, installer images, kickstarts.
#[derive(Debug, Clone)]
pub struct RepositoryFileCandidate {
    pub file_category: String,
    pub file_type: String,
    pub sha256: Option<String>,
    pub size_bytes: Option<u64>,
    pub href: String,
    /// Exact upstream-relative path, preserved verbatim so mirror-mode
    /// publish can reconstruct the original layout.
    pub original_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchCandidatesResult {
    pub candidates: Vec<Candidate>,
    pub files: Vec<RepositoryFileCandidate>,
}

/// Credentials/transport hints a plugin needs in order to reach `feed_url`.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[async_trait]
pub trait Syncer: Send + Sync {
    async fn fetch_candidates(
        &self,
        feed_url: &str,
        auth: &AuthContext,
        mirror_mode: bool,
    ) -> Result<FetchCandidatesResult, PluginError>;
}

/// Deterministic version ordering, used by the filter engine's
/// `only_latest_*` post-processing and by snapshot-diff's "updated"
/// classification.
pub trait VersionOrd: Send + Sync {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    Filtered,
    Mirror,
}

/// One linked item ready to be materialized by a plugin's publisher:
/// its pool location plus enough identity to place it in the
/// format-correct layout and regenerate metadata in filtered mode.
#[derive(Debug, Clone)]
pub struct PublishItem {
    pub sha256: String,
    pub filename: String,
    pub pool_path: PathBuf,
    pub size_bytes: u64,
    pub name: String,
    pub version: String,
    pub arch: Option<String>,
    pub metadata: Json,
    /// Present for mirror-mode items (both RepositoryFiles and
    /// ContentItems recorded with their upstream-relative path).
    pub original_path: Option<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        items: &[PublishItem],
        target_dir: &Path,
        mode: PublishMode,
    ) -> Result<(), PluginError>;
}

/// A format plugin is the pairing of a `Syncer`, a `Publisher`, and the
/// version comparator both the filter engine and `SnapshotManager::Diff`
/// use. `content_type` is the plugin's `ContentItem.content_type` tag.
pub trait FormatPlugin: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn syncer(&self) -> &dyn Syncer;
    fn publisher(&self) -> &dyn Publisher;
    fn version_ord(&self) -> &dyn VersionOrd;
}
