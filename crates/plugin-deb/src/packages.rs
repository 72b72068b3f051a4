//! `Packages[.gz|.xz]` parsing: one RFC 822 paragraph per binary
//! package, with `Package`, `Version`, `Architecture`, `Filename`,
//! `SHA256`, `Size`, and the dependency/descriptive fields.

use serde_json::json;

use crate::paragraph::{field, parse_paragraphs};

#[derive(Debug, Clone, Default)]
pub struct DebPackage {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub filename: String,
    pub sha256: String,
    pub size: u64,
    pub section: String,
    pub priority: String,
    pub maintainer: String,
    pub depends: String,
}

pub fn parse(text: &str) -> Vec<DebPackage> {
    parse_paragraphs(text)
        .into_iter()
        .map(|p| DebPackage {
            package: field(&p, "package").unwrap_or_default().to_string(),
            version: field(&p, "version").unwrap_or_default().to_string(),
            architecture: field(&p, "architecture").unwrap_or_default().to_string(),
            filename: field(&p, "filename").unwrap_or_default().to_string(),
            sha256: field(&p, "sha256").unwrap_or_default().to_string(),
            size: field(&p, "size").and_then(|s| s.parse().ok()).unwrap_or(0),
            section: field(&p, "section").unwrap_or_default().to_string(),
            priority: field(&p, "priority").unwrap_or_default().to_string(),
            maintainer: field(&p, "maintainer").unwrap_or_default().to_string(),
            depends: field(&p, "depends").unwrap_or_default().to_string(),
        })
        .collect()
}

impl DebPackage {
    pub fn metadata_json(&self) -> serde_json::Value {
        json!({
            "arch": self.architecture,
            "section": self.section,
            "priority": self.priority,
            "maintainer": self.maintainer,
            "depends": self.depends,
        })
    }

    pub fn source_name(&self) -> String {
        // Debian's convention for pool paths: 3/4-letter "lib" packages
        // bucket under `lib<x>`, everything else under its own first
        // letter.
        if self.package.starts_with("lib") && self.package.len() > 3 {
            self.package[..4].to_string()
        } else {
            self.package
                .chars()
                .next()
                .map(|c| c.to_string())
                .unwrap_or_default()
        }
    }
}

/// Renders a `Packages` file paragraph for one generated entry.
pub fn write_entry(pkg: &DebPackage) -> String {
    let mut out = String::new();
    out.push_str(&format!("Package: {}\n", pkg.package));
    out.push_str(&format!("Version: {}\n", pkg.version));
    out.push_str(&format!("Architecture: {}\n", pkg.architecture));
    if !pkg.maintainer.is_empty() {
        out.push_str(&format!("Maintainer: {}\n", pkg.maintainer));
    }
    if !pkg.depends.is_empty() {
        out.push_str(&format!("Depends: {}\n", pkg.depends));
    }
    if !pkg.section.is_empty() {
        out.push_str(&format!("Section: {}\n", pkg.section));
    }
    if !pkg.priority.is_empty() {
        out.push_str(&format!("Priority: {}\n", pkg.priority));
    }
    out.push_str(&format!("Filename: {}\n", pkg.filename));
    out.push_str(&format!("Size: {}\n", pkg.size));
    out.push_str(&format!("SHA256: {}\n", pkg.sha256));
    out.push('\n');
    out
}
