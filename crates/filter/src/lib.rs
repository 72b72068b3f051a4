//! Selects a subset of a format plugin's candidate list by name pattern,
//! architecture, size, RPM-specific fields, and latest-version
//! post-processing.

use std::collections::HashMap;

use packmirror_plugin_api::{Candidate, VersionOrd};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("mirror mode repositories cannot configure filters")]
    FiltersOnMirrorRepository,
}

impl packmirror_errors::Classify for FilterError {
    fn kind(&self) -> packmirror_errors::ErrorKind {
        packmirror_errors::ErrorKind::ConfigInvalid
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternFilters {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchFilters {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SizeFilters {
    pub max_bytes: Option<u64>,
    pub min_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataFilters {
    #[serde(default)]
    pub architectures: ArchFilters,
    #[serde(default)]
    pub size: SizeFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpmFilters {
    #[serde(default)]
    pub exclude_source_rpms: bool,
    #[serde(default)]
    pub groups: PatternFilters,
    #[serde(default)]
    pub licenses: PatternFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostProcessing {
    #[serde(default)]
    pub only_latest_version: bool,
    pub only_latest_n_versions: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub patterns: PatternFilters,
    #[serde(default)]
    pub metadata: MetadataFilters,
    #[serde(default)]
    pub rpm: RpmFilters,
    #[serde(default)]
    pub post_processing: PostProcessing,
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.patterns.include.is_empty()
            && self.patterns.exclude.is_empty()
            && self.metadata.architectures.include.is_empty()
            && self.metadata.architectures.exclude.is_empty()
            && self.metadata.size.max_bytes.is_none()
            && self.metadata.size.min_bytes.is_none()
            && !self.rpm.exclude_source_rpms
            && self.rpm.groups.include.is_empty()
            && self.rpm.groups.exclude.is_empty()
            && self.rpm.licenses.include.is_empty()
            && self.rpm.licenses.exclude.is_empty()
            && !self.post_processing.only_latest_version
            && self.post_processing.only_latest_n_versions.is_none()
    }
}

/// Validates a repository's mode/filter combination at config-load time:
/// mirror mode accepting any filter is a `ConfigInvalid` error, not a
/// silently-ignored option.
pub fn validate_mirror_compatibility(mirror_mode: bool, filters: &FilterConfig) -> Result<(), FilterError> {
    if mirror_mode && !filters.is_empty() {
        return Err(FilterError::FiltersOnMirrorRepository);
    }
    Ok(())
}

fn compiled(patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| FilterError::InvalidRegex {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Applies every configured predicate, then `only_latest_version`/
/// `only_latest_n_versions` grouped by `(name, arch)`.
pub fn apply(
    candidates: Vec<Candidate>,
    config: &FilterConfig,
    version_ord: &dyn VersionOrd,
) -> Result<Vec<Candidate>, FilterError> {
    let include = compiled(&config.patterns.include)?;
    let exclude = compiled(&config.patterns.exclude)?;
    let group_include = compiled(&config.rpm.groups.include)?;
    let group_exclude = compiled(&config.rpm.groups.exclude)?;
    let license_include = compiled(&config.rpm.licenses.include)?;
    let license_exclude = compiled(&config.rpm.licenses.exclude)?;

    let filtered: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| include.is_empty() || include.iter().any(|r| r.is_match(&c.name)))
        .filter(|c| !exclude.iter().any(|r| r.is_match(&c.name)))
        .filter(|c| {
            let arch = c.arch.as_deref().unwrap_or("");
            config.metadata.architectures.include.is_empty()
                || config
                    .metadata
                    .architectures
                    .include
                    .iter()
                    .any(|a| a == arch)
        })
        .filter(|c| {
            let arch = c.arch.as_deref().unwrap_or("");
            !config
                .metadata
                .architectures
                .exclude
                .iter()
                .any(|a| a == arch)
        })
        .filter(|c| match (c.size_bytes, config.metadata.size.max_bytes) {
            (Some(size), Some(max)) => size <= max,
            _ => true,
        })
        .filter(|c| match (c.size_bytes, config.metadata.size.min_bytes) {
            (Some(size), Some(min)) => size >= min,
            _ => true,
        })
        .filter(|c| !(config.rpm.exclude_source_rpms && c.href.ends_with(".src.rpm")))
        .filter(|c| {
            let group = c.metadata.get("group").and_then(|v| v.as_str()).unwrap_or("");
            group_include.is_empty() || group_include.iter().any(|r| r.is_match(group))
        })
        .filter(|c| {
            let group = c.metadata.get("group").and_then(|v| v.as_str()).unwrap_or("");
            !group_exclude.iter().any(|r| r.is_match(group))
        })
        .filter(|c| {
            let license = c
                .metadata
                .get("license")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            license_include.is_empty() || license_include.iter().any(|r| r.is_match(license))
        })
        .filter(|c| {
            let license = c
                .metadata
                .get("license")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            !license_exclude.iter().any(|r| r.is_match(license))
        })
        .collect();

    Ok(post_process(filtered, &config.post_processing, version_ord))
}

fn post_process(
    candidates: Vec<Candidate>,
    post: &PostProcessing,
    version_ord: &dyn VersionOrd,
) -> Vec<Candidate> {
    if !post.only_latest_version && post.only_latest_n_versions.is_none() {
        return candidates;
    }
    let keep_n = if post.only_latest_version {
        1
    } else {
        post.only_latest_n_versions.unwrap_or(usize::MAX)
    };

    let mut groups: HashMap<(String, String), Vec<Candidate>> = HashMap::new();
    for c in candidates {
        let key = (c.name.clone(), c.arch.clone().unwrap_or_default());
        groups.entry(key).or_default().push(c);
    }
    let mut result = Vec::new();
    for (_, mut items) in groups {
        items.sort_by(|a, b| version_ord.compare(&b.version, &a.version));
        items.truncate(keep_n);
        result.extend(items);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cmp::Ordering;

    struct LexOrd;
    impl VersionOrd for LexOrd {
        fn compare(&self, a: &str, b: &str) -> Ordering {
            a.cmp(b)
        }
    }

    fn candidate(name: &str, version: &str, arch: &str) -> Candidate {
        Candidate {
            name: name.to_string(),
            version: version.to_string(),
            arch: Some(arch.to_string()),
            sha256: None,
            size_bytes: Some(100),
            href: format!("{name}-{version}.{arch}.rpm"),
            content_type: "rpm".to_string(),
            metadata: json!({}),
        }
    }

    #[test]
    fn include_pattern_keeps_only_matches() {
        let config = FilterConfig {
            patterns: PatternFilters {
                include: vec!["^foo".to_string()],
                exclude: vec![],
            },
            ..Default::default()
        };
        let items = vec![candidate("foo-bar", "1.0", "x86_64"), candidate("baz", "1.0", "x86_64")];
        let out = apply(items, &config, &LexOrd).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "foo-bar");
    }

    #[test]
    fn only_latest_version_keeps_highest_per_name_arch() {
        let config = FilterConfig {
            post_processing: PostProcessing {
                only_latest_version: true,
                only_latest_n_versions: None,
            },
            ..Default::default()
        };
        let items = vec![
            candidate("foo", "1.0", "x86_64"),
            candidate("foo", "2.0", "x86_64"),
            candidate("foo", "1.5", "aarch64"),
        ];
        let out = apply(items, &config, &LexOrd).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|c| c.version == "2.0"));
        assert!(out.iter().any(|c| c.version == "1.5"));
    }

    #[test]
    fn mirror_mode_with_filters_is_rejected() {
        let config = FilterConfig {
            patterns: PatternFilters {
                include: vec!["x".to_string()],
                exclude: vec![],
            },
            ..Default::default()
        };
        let err = validate_mirror_compatibility(true, &config).unwrap_err();
        assert!(matches!(err, FilterError::FiltersOnMirrorRepository));
    }
}
