//! Root YAML configuration: database location, storage layout, download
//! and proxy/TLS tuning, and the `repositories`/`views` lists. Relative
//! paths are resolved against the directory the config file lives in,
//! not the process's current directory.

use std::path::{Path, PathBuf};

use packmirror_filter::FilterConfig;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to expand include glob {pattern:?}: {source}")]
    Include {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("repository {id:?}: {source}")]
    Repository {
        id: String,
        #[source]
        source: packmirror_filter::FilterError,
    },
    #[error("duplicate repository id {0:?}")]
    DuplicateRepository(String),
    #[error("view {view:?} references unknown repository {repo:?}")]
    UnknownViewMember { view: String, repo: String },
}

impl packmirror_errors::Classify for ConfigError {
    fn kind(&self) -> packmirror_errors::ErrorKind {
        packmirror_errors::ErrorKind::ConfigInvalid
    }
}

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    pub pool_path: Option<PathBuf>,
    pub published_path: Option<PathBuf>,
    pub tmp_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn pool_path(&self) -> PathBuf {
        self.pool_path.clone().unwrap_or_else(|| self.base_path.join("pool"))
    }

    pub fn published_path(&self) -> PathBuf {
        self.published_path
            .clone()
            .unwrap_or_else(|| self.base_path.join("published"))
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.tmp_path.clone().unwrap_or_else(|| self.base_path.join("tmp"))
    }

    fn resolve(&mut self, base_dir: &Path) {
        self.base_path = resolve_path(base_dir, &self.base_path);
        self.pool_path = self.pool_path.take().map(|p| resolve_path(base_dir, &p));
        self.published_path = self.published_path.take().map(|p| resolve_path(base_dir, &p));
        self.tmp_path = self.tmp_path.take().map(|p| resolve_path(base_dir, &p));
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub parallel: usize,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            parallel: 10,
            timeout_secs: 300,
            retry_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub ca_bundle: Option<PathBuf>,
    pub verify: bool,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            ca_bundle: None,
            verify: true,
            client_cert: None,
            client_key: None,
        }
    }
}

impl SslConfig {
    fn resolve(&mut self, base_dir: &Path) {
        self.ca_bundle = self.ca_bundle.take().map(|p| resolve_path(base_dir, &p));
        self.client_cert = self.client_cert.take().map(|p| resolve_path(base_dir, &p));
        self.client_key = self.client_key.take().map(|p| resolve_path(base_dir, &p));
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// One of `mirror`, `newest-only`, `keep-all`, `keep-last-n`.
    pub policy: String,
    pub keep_last_n: Option<usize>,
    /// `remove` (default) or `keep`: whether `newest-only` drops items
    /// missing from the upstream candidate list entirely.
    pub deleted_packages: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            policy: "newest-only".to_string(),
            keep_last_n: None,
            deleted_packages: "remove".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    pub feed: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    pub ssl: Option<SslConfig>,
    pub proxy: Option<ProxyConfig>,
    /// Format-specific passthrough (`rpm`, `apt`, `helm`, `apk` sections);
    /// each plugin's own config type deserializes the relevant one.
    #[serde(default)]
    pub rpm: serde_yaml::Value,
    #[serde(default)]
    pub apt: serde_yaml::Value,
    #[serde(default)]
    pub helm: serde_yaml::Value,
    #[serde(default)]
    pub apk: serde_yaml::Value,
}

impl RepositoryConfig {
    pub fn is_mirror(&self) -> bool {
        self.mode == "mirror"
    }
}

fn default_true() -> bool {
    true
}

fn default_mode() -> String {
    "filtered".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    pub name: String,
    pub repos: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Option<DatabaseConfig>,
    pub storage: StorageConfig,
    pub download: DownloadConfig,
    pub proxy: ProxyConfig,
    pub ssl: SslConfig,
    pub repositories: Vec<RepositoryConfig>,
    pub views: Vec<ViewConfig>,
    pub include: Option<String>,
}

/// Loads and validates `path`, merging any `include` glob (resolved
/// relative to `path`'s directory) and resolving every relative
/// filesystem path against that same directory.
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut config = parse_file(path)?;

    if let Some(pattern) = config.include.clone() {
        let glob_pattern = resolve_path(base_dir, Path::new(&pattern));
        let entries = glob::glob(&glob_pattern.to_string_lossy()).map_err(|source| ConfigError::Include {
            pattern: pattern.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let fragment = parse_file(&entry)?;
            config.repositories.extend(fragment.repositories);
            config.views.extend(fragment.views);
        }
    }

    config.storage.resolve(base_dir);
    config.ssl.resolve(base_dir);
    for repo in &mut config.repositories {
        if let Some(ssl) = &mut repo.ssl {
            ssl.resolve(base_dir);
        }
    }

    validate(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate(config: &Config) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for repo in &config.repositories {
        if !seen.insert(repo.id.clone()) {
            return Err(ConfigError::DuplicateRepository(repo.id.clone()));
        }
        packmirror_filter::validate_mirror_compatibility(repo.is_mirror(), &repo.filters).map_err(|source| {
            ConfigError::Repository {
                id: repo.id.clone(),
                source,
            }
        })?;
    }
    for view in &config.views {
        for repo_id in &view.repos {
            if !config.repositories.iter().any(|r| &r.id == repo_id) {
                return Err(ConfigError::UnknownViewMember {
                    view: view.name.clone(),
                    repo: repo_id.clone(),
                });
            }
        }
    }
    Ok(())
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn relative_storage_path_resolves_against_config_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "config.yaml",
            "storage:\n  base_path: data\nrepositories: []\nviews: []\n",
        );
        let config = load(&path).unwrap();
        assert_eq!(config.storage.base_path, tmp.path().join("data"));
        assert_eq!(config.storage.pool_path(), tmp.path().join("data").join("pool"));
    }

    #[test]
    fn mirror_mode_with_filters_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "config.yaml",
            "storage:\n  base_path: data\nrepositories:\n  - id: r1\n    type: rpm\n    feed: https://example.com\n    mode: mirror\n    filters:\n      patterns:\n        include: [\"foo\"]\nviews: []\n",
        );
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Repository { .. }));
    }

    #[test]
    fn view_referencing_unknown_repository_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "config.yaml",
            "storage:\n  base_path: data\nrepositories: []\nviews:\n  - name: v1\n    repos: [missing]\n",
        );
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownViewMember { .. }));
    }
}
