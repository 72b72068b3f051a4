//! Orchestrates one repository sync: a format plugin's candidate list
//! is filtered, diffed against what the metastore already links for
//! this repository, and the `need` set is downloaded into the pool
//! under a bounded worker pool before retention is applied.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use packmirror_errors::{Classify, ErrorKind, ItemFailure, SyncSummary};
use packmirror_fetcher::Fetcher;
use packmirror_filter::FilterConfig;
use packmirror_metastore::{DiffClass, MetaStore, NewContentItem, NewRepositoryFile, SyncStatus};
use packmirror_plugin_api::{AuthContext, Candidate, FormatPlugin, RepositoryFileCandidate};
use packmirror_pool::{Pool, Subtree};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("filter configuration invalid: {0}")]
    Filter(#[from] packmirror_filter::FilterError),
    #[error("metastore error: {0}")]
    MetaStore(#[from] packmirror_metastore::MetaStoreError),
    #[error("plugin error: {0}")]
    Plugin(#[from] packmirror_plugin_api::PluginError),
}

impl Classify for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Filter(e) => e.kind(),
            SyncError::MetaStore(e) => e.kind(),
            SyncError::Plugin(e) => e.kind(),
        }
    }
}

/// How a repository retains previously linked content once it no longer
/// appears in the upstream candidate list.
#[derive(Debug, Clone)]
pub enum RetentionPolicy {
    /// Mirror-mode repositories: unlink everything not currently upstream.
    Mirror,
    /// Unlink an item only once a newer version of the same name is
    /// present upstream; items missing entirely stay linked when
    /// `keep_missing` is set.
    NewestOnly { keep_missing: bool },
    KeepAll,
    KeepLastN(usize),
}

#[derive(Debug, Clone)]
pub struct SyncRepoConfig {
    pub repository_id: String,
    pub feed_url: String,
    pub auth: AuthContext,
    pub mirror_mode: bool,
    pub filters: FilterConfig,
    pub retention: RetentionPolicy,
    pub download_parallel: usize,
}

/// Result of a read-only diff against upstream: nothing is downloaded or
/// linked, it just reports what a real sync would do.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub present: usize,
    pub pool_hits: usize,
    pub needed: Vec<Candidate>,
}

pub struct SyncEngine {
    pool: Arc<Pool>,
    metastore: Arc<MetaStore>,
    fetcher: Arc<Fetcher>,
}

impl SyncEngine {
    pub fn new(pool: Arc<Pool>, metastore: Arc<MetaStore>, fetcher: Arc<Fetcher>) -> Self {
        Self {
            pool,
            metastore,
            fetcher,
        }
    }

    pub async fn sync_repository(
        &self,
        plugin: &dyn FormatPlugin,
        config: &SyncRepoConfig,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let run_id = self.metastore.start_sync_run(&config.repository_id)?;
        info!(repository_id = %config.repository_id, run_id, "sync started");

        let result = self.run(plugin, config, cancel).await;

        let summary = match &result {
            Ok(summary) => summary.clone(),
            Err(e) => SyncSummary {
                failures: vec![ItemFailure {
                    item: config.repository_id.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                }],
                ..Default::default()
            },
        };
        let status = if result.is_err() {
            SyncStatus::Failed
        } else if summary.is_partial() {
            SyncStatus::Partial
        } else {
            SyncStatus::Success
        };
        self.metastore.finish_sync_run(
            run_id,
            status,
            summary.downloaded as i64,
            summary.skipped as i64,
            summary.failures.len() as i64,
            summary.bytes_transferred as i64,
            summary.failures.first().map(|f| f.message.as_str()),
        )?;
        if status == SyncStatus::Success || status == SyncStatus::Partial {
            self.metastore.mark_synced(&config.repository_id, Utc::now())?;
        }
        info!(repository_id = %config.repository_id, %summary, "sync finished");
        result
    }

    /// Diffs a repository's current upstream candidates against what is
    /// already linked, without downloading or linking anything. Used by
    /// the `check-updates` CLI command to report what a real sync would
    /// do.
    pub async fn check_updates(
        &self,
        plugin: &dyn FormatPlugin,
        config: &SyncRepoConfig,
    ) -> Result<UpdatePlan, SyncError> {
        let (candidates, _files, linked_by_filename) = self.fetch_and_prepare(plugin, config).await?;
        let present = candidates
            .iter()
            .filter(|c| linked_by_filename.contains_key(&filename_of(&c.href)))
            .count();
        let (poolhit, need) = self.classify_all(&candidates, &linked_by_filename)?;
        Ok(UpdatePlan {
            present,
            pool_hits: poolhit.len(),
            needed: need,
        })
    }

    async fn fetch_and_prepare(
        &self,
        plugin: &dyn FormatPlugin,
        config: &SyncRepoConfig,
    ) -> Result<(Vec<Candidate>, Vec<RepositoryFileCandidate>, HashMap<String, (i64, String)>), SyncError> {
        let fetched = plugin
            .syncer()
            .fetch_candidates(&config.feed_url, &config.auth, config.mirror_mode)
            .await?;

        let candidates = if config.mirror_mode {
            fetched.candidates
        } else {
            packmirror_filter::apply(fetched.candidates, &config.filters, plugin.version_ord())?
        };

        let linked = self.metastore.list_repository_content(&config.repository_id)?;
        let linked_by_filename: HashMap<String, (i64, String)> = linked
            .iter()
            .map(|item| (item.filename.clone(), (item.id, item.sha256.clone())))
            .collect();

        Ok((candidates, fetched.files, linked_by_filename))
    }

    fn classify_all(
        &self,
        candidates: &[Candidate],
        linked_by_filename: &HashMap<String, (i64, String)>,
    ) -> Result<(Vec<Candidate>, Vec<Candidate>), SyncError> {
        let mut poolhit = Vec::new();
        let mut need = Vec::new();
        for candidate in candidates {
            let filename = filename_of(&candidate.href);
            match classify(&filename, candidate.sha256.as_deref(), linked_by_filename, &self.metastore)? {
                DiffClass::Present => {}
                DiffClass::PoolHit => poolhit.push(candidate.clone()),
                DiffClass::Need => need.push(candidate.clone()),
            }
        }
        Ok((poolhit, need))
    }

    async fn run(
        &self,
        plugin: &dyn FormatPlugin,
        config: &SyncRepoConfig,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let (candidates, files, linked_by_filename) = self.fetch_and_prepare(plugin, config).await?;
        let linked = self.metastore.list_repository_content(&config.repository_id)?;

        let (poolhit, need) = self.classify_all(&candidates, &linked_by_filename)?;

        let mut summary = SyncSummary::default();

        // Pool hits: the content item already exists (another repository
        // pulled it in); just link it here.
        let mut to_link = Vec::new();
        for candidate in &poolhit {
            let filename = filename_of(&candidate.href);
            if let Some(item) = self
                .metastore
                .content_item_by_sha256(candidate.sha256.as_deref().unwrap_or_default())?
            {
                to_link.push(item.id);
                summary.skipped += 1;
            } else {
                warn!(filename, "poolhit candidate vanished between classify and link");
            }
        }
        if !to_link.is_empty() {
            self.metastore.link_repository_content(&config.repository_id, &to_link)?;
        }

        let parallel = config.download_parallel.max(1);
        let results: Vec<Result<(i64, u64), ItemFailure>> = stream::iter(need.into_iter().map(|candidate| {
            let feed_url = config.feed_url.clone();
            async move { self.download_one(&feed_url, &candidate, cancel).await }
        }))
        .buffer_unordered(parallel)
        .collect()
        .await;

        let mut newly_linked = Vec::new();
        for r in results {
            match r {
                Ok((content_item_id, bytes)) => {
                    newly_linked.push(content_item_id);
                    summary.downloaded += 1;
                    summary.bytes_transferred += bytes;
                }
                Err(failure) => summary.failures.push(failure),
            }
        }
        if !newly_linked.is_empty() {
            self.metastore
                .link_repository_content(&config.repository_id, &newly_linked)?;
        }

        self.apply_retention(config, &candidates, &linked, plugin.version_ord())?;

        if config.mirror_mode {
            self.sync_repository_files(config, &files, cancel, &mut summary).await?;
        }

        Ok(summary)
    }

    async fn download_one(
        &self,
        feed_url: &str,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<(i64, u64), ItemFailure> {
        let filename = filename_of(&candidate.href);
        let item_label = format!("{}-{}", candidate.name, candidate.version);
        let to_failure = |kind: ErrorKind, message: String| ItemFailure {
            item: item_label.clone(),
            kind,
            message,
        };

        let url = resolve_url(feed_url, &candidate.href);
        let fetched = self
            .fetcher
            .get(&url, candidate.sha256.as_deref(), cancel)
            .await
            .map_err(|e| to_failure(e.kind(), e.to_string()))?;

        let outcome = self
            .pool
            .add(&fetched.temp_path, &filename, Subtree::Content, Some(&fetched.sha256))
            .map_err(|e| to_failure(e.kind(), e.to_string()))?;

        let (content_item, _created) = self
            .metastore
            .upsert_content_item(&NewContentItem {
                sha256: outcome.sha256.clone(),
                filename,
                size_bytes: outcome.size_bytes as i64,
                content_type: candidate.content_type.clone(),
                name: candidate.name.clone(),
                version: candidate.version.clone(),
                metadata: candidate.metadata.clone(),
            })
            .map_err(|e| to_failure(e.kind(), e.to_string()))?;

        Ok((content_item.id, outcome.size_bytes))
    }

    async fn sync_repository_files(
        &self,
        config: &SyncRepoConfig,
        files: &[RepositoryFileCandidate],
        cancel: &CancellationToken,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        for file in files {
            let url = resolve_url(&config.feed_url, &file.href);
            match self.fetcher.get(&url, file.sha256.as_deref(), cancel).await {
                Ok(fetched) => {
                    let filename = filename_of(&file.original_path);
                    match self
                        .pool
                        .add(&fetched.temp_path, &filename, Subtree::Files, Some(&fetched.sha256))
                    {
                        Ok(outcome) => {
                            summary.bytes_transferred += outcome.size_bytes;
                            self.metastore.upsert_repository_file(
                                &config.repository_id,
                                &NewRepositoryFile {
                                    file_category: file.file_category.clone(),
                                    file_type: file.file_type.clone(),
                                    sha256: outcome.sha256,
                                    size_bytes: outcome.size_bytes as i64,
                                    original_path: file.original_path.clone(),
                                    metadata: serde_json::Value::Null,
                                },
                            )?;
                        }
                        Err(e) => summary.failures.push(ItemFailure {
                            item: file.original_path.clone(),
                            kind: e.kind(),
                            message: e.to_string(),
                        }),
                    }
                }
                Err(e) => summary.failures.push(ItemFailure {
                    item: file.original_path.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(())
    }

    fn apply_retention(
        &self,
        config: &SyncRepoConfig,
        current: &[Candidate],
        linked: &[packmirror_metastore::ContentItem],
        version_ord: &dyn packmirror_plugin_api::VersionOrd,
    ) -> Result<(), SyncError> {
        let current_filenames: HashSet<String> =
            current.iter().map(|c| filename_of(&c.href)).collect();
        let removed: Vec<&packmirror_metastore::ContentItem> = linked
            .iter()
            .filter(|item| !current_filenames.contains(&item.filename))
            .collect();
        if removed.is_empty() {
            return Ok(());
        }

        let unlink_ids: Vec<i64> = match &config.retention {
            RetentionPolicy::Mirror => removed.iter().map(|i| i.id).collect(),
            RetentionPolicy::KeepAll => Vec::new(),
            RetentionPolicy::NewestOnly { keep_missing } => {
                let mut latest_by_name: HashMap<&str, &str> = HashMap::new();
                for c in current {
                    let entry = latest_by_name.entry(&c.name).or_insert(&c.version);
                    if version_ord.compare(&c.version, entry) == std::cmp::Ordering::Greater {
                        *entry = &c.version;
                    }
                }
                removed
                    .iter()
                    .filter(|item| match latest_by_name.get(item.name.as_str()) {
                        Some(latest) => version_ord.compare(&item.version, latest) == std::cmp::Ordering::Less,
                        None => !*keep_missing,
                    })
                    .map(|i| i.id)
                    .collect()
            }
            RetentionPolicy::KeepLastN(n) => {
                // Grouped by (name, arch), matching `only_latest_n_versions`'s
                // semantics in packmirror-filter, so a multi-arch package
                // keeps N versions per architecture rather than N combined.
                let mut by_name_arch: HashMap<(&str, &str), Vec<&packmirror_metastore::ContentItem>> = HashMap::new();
                for item in linked {
                    let arch = item_arch(item);
                    by_name_arch.entry((item.name.as_str(), arch)).or_default().push(item);
                }
                let mut unlink = Vec::new();
                for items in by_name_arch.values_mut() {
                    items.sort_by(|a, b| version_ord.compare(&b.version, &a.version));
                    unlink.extend(items.iter().skip(*n).map(|i| i.id));
                }
                unlink
            }
        };

        if !unlink_ids.is_empty() {
            self.metastore.unlink_repository_content(&config.repository_id, &unlink_ids)?;
        }
        Ok(())
    }
}

fn classify(
    filename: &str,
    sha256: Option<&str>,
    linked: &HashMap<String, (i64, String)>,
    metastore: &MetaStore,
) -> Result<DiffClass, SyncError> {
    if linked.contains_key(filename) {
        return Ok(DiffClass::Present);
    }
    if let Some(sha) = sha256 {
        if metastore.content_item_by_sha256(sha)?.is_some() {
            return Ok(DiffClass::PoolHit);
        }
    }
    Ok(DiffClass::Need)
}

fn filename_of(href: &str) -> String {
    href.rsplit('/').next().unwrap_or(href).to_string()
}

fn item_arch(item: &packmirror_metastore::ContentItem) -> &str {
    item.metadata.get("arch").and_then(|v| v.as_str()).unwrap_or("")
}

fn resolve_url(feed_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match url::Url::parse(feed_url).and_then(|base| base.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}/{}", feed_url.trim_end_matches('/'), href.trim_start_matches('/')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_of_strips_leading_path() {
        assert_eq!(filename_of("repodata/primary.xml.gz"), "primary.xml.gz");
        assert_eq!(filename_of("pkg-1.0.rpm"), "pkg-1.0.rpm");
    }

    #[test]
    fn resolve_url_joins_relative_href() {
        assert_eq!(
            resolve_url("https://example.com/repo/", "pkg-1.0.rpm"),
            "https://example.com/repo/pkg-1.0.rpm"
        );
    }

    #[test]
    fn resolve_url_passes_through_absolute_href() {
        assert_eq!(
            resolve_url("https://example.com/repo/", "https://cdn.example.com/pkg-1.0.rpm"),
            "https://cdn.example.com/pkg-1.0.rpm"
        );
    }
}
