//! Wires a loaded [`packmirror_config::Config`] into the live objects a
//! subcommand needs: the pool, the metastore, a shared fetcher, and the
//! sync/snapshot/publish orchestrators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use packmirror_config::{Config, RepositoryConfig};
use packmirror_fetcher::{Fetcher, FetcherConfig};
use packmirror_metastore::MetaStore;
use packmirror_plugin_api::{AuthContext, FormatPlugin};
use packmirror_pool::Pool;
use packmirror_publish::Publisher;
use packmirror_snapshot::SnapshotManager;
use packmirror_sync::{RetentionPolicy, SyncEngine, SyncRepoConfig};

use crate::transport::HttpTransport;

pub struct App {
    pub config: Config,
    pub pool: Arc<Pool>,
    pub metastore: Arc<MetaStore>,
    pub fetcher: Arc<Fetcher>,
    pub sync_engine: SyncEngine,
    pub snapshot_manager: SnapshotManager,
    pub publisher: Publisher,
}

impl App {
    pub fn load(config_path: &std::path::Path) -> Result<Self> {
        let config = packmirror_config::load(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?;

        let db_path = database_path(&config)?;
        let metastore = Arc::new(MetaStore::open(&db_path).with_context(|| format!("opening database {}", db_path.display()))?);
        let pool = Arc::new(Pool::open(config.storage.pool_path())?);

        let fetcher_config = FetcherConfig {
            timeout: Duration::from_secs(config.download.timeout_secs),
            retry_attempts: config.download.retry_attempts,
            http_proxy: config.proxy.http_proxy.clone(),
            https_proxy: config.proxy.https_proxy.clone(),
            proxy_username: config.proxy.username.clone(),
            proxy_password: config.proxy.password.clone(),
            ca_bundle: config.ssl.ca_bundle.clone(),
            verify_tls: config.ssl.verify,
            client_cert: config.ssl.client_cert.clone(),
            client_key: config.ssl.client_key.clone(),
        };
        let fetcher = Arc::new(Fetcher::new(fetcher_config, config.storage.tmp_path())?);

        let sync_engine = SyncEngine::new(pool.clone(), metastore.clone(), fetcher.clone());
        let snapshot_manager = SnapshotManager::new(metastore.clone());
        let publisher = Publisher::new(metastore.clone(), pool.clone());

        Ok(Self {
            config,
            pool,
            metastore,
            fetcher,
            sync_engine,
            snapshot_manager,
            publisher,
        })
    }

    pub fn repository(&self, id: &str) -> Result<&RepositoryConfig> {
        self.config
            .repositories
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("no repository configured with id {id:?}"))
    }

    /// Builds the format plugin for `repo`, backed by an HTTP transport
    /// rooted at its feed URL and sharing this `App`'s `Fetcher` (and so
    /// its retry/backoff, proxy, and TLS-cert configuration) with the
    /// bulk sync path. Each call constructs a fresh plugin; the
    /// transport itself is cheap to build.
    pub fn build_plugin(&self, repo: &RepositoryConfig) -> Result<Box<dyn FormatPlugin>> {
        let transport = HttpTransport::new(self.fetcher.clone(), &repo.feed)?;

        let plugin: Box<dyn FormatPlugin> = match repo.repo_type.as_str() {
            "rpm" => Box::new(packmirror_plugin_rpm::RpmPlugin::new(transport)),
            "deb" => {
                let opts: DebOptions = serde_yaml::from_value(repo.apt.clone()).unwrap_or_default();
                Box::new(packmirror_plugin_deb::DebPlugin::new(
                    transport,
                    packmirror_plugin_deb::DebRepoConfig {
                        distribution: opts.distribution,
                        components: opts.components,
                    },
                ))
            }
            "helm" => Box::new(packmirror_plugin_helm::HelmPlugin::new(transport)),
            "apk" => {
                let opts: ApkOptions = serde_yaml::from_value(repo.apk.clone()).unwrap_or_default();
                Box::new(packmirror_plugin_apk::ApkPlugin::new(
                    transport,
                    packmirror_plugin_apk::ApkRepoConfig {
                        branch_path: opts.branch,
                    },
                ))
            }
            other => return Err(anyhow!("unsupported repository type {other:?}")),
        };
        Ok(plugin)
    }

    pub fn sync_repo_config(&self, repo: &RepositoryConfig) -> SyncRepoConfig {
        SyncRepoConfig {
            repository_id: repo.id.clone(),
            feed_url: repo.feed.clone(),
            auth: AuthContext::default(),
            mirror_mode: repo.is_mirror(),
            filters: repo.filters.clone(),
            retention: retention_policy(repo),
            download_parallel: self.config.download.parallel,
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct DebOptions {
    #[serde(default)]
    distribution: String,
    #[serde(default)]
    components: Vec<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ApkOptions {
    #[serde(default)]
    branch: String,
}

fn retention_policy(repo: &RepositoryConfig) -> RetentionPolicy {
    if repo.is_mirror() {
        return RetentionPolicy::Mirror;
    }
    match repo.retention.policy.as_str() {
        "mirror" => RetentionPolicy::Mirror,
        "keep-all" => RetentionPolicy::KeepAll,
        "keep-last-n" => RetentionPolicy::KeepLastN(repo.retention.keep_last_n.unwrap_or(1)),
        _ => RetentionPolicy::NewestOnly {
            keep_missing: repo.retention.deleted_packages == "keep",
        },
    }
}

fn database_path(config: &Config) -> Result<PathBuf> {
    let url = config
        .database
        .as_ref()
        .ok_or_else(|| anyhow!("config is missing a `database.url` section"))?
        .url
        .clone();
    let path = url
        .strip_prefix("sqlite://")
        .ok_or_else(|| anyhow!("unsupported database.url scheme in {url:?}; only sqlite:// is supported"))?;
    Ok(PathBuf::from(path))
}
