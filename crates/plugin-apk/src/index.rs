//! `APKINDEX` stanza parsing. The index lives as a file named
//! `APKINDEX` inside a gzipped tar archive (`APKINDEX.tar.gz`),
//! alongside a `DESCRIPTION` and `.SIGN.RSA.*` member this mirror does
//! not need to preserve. Stanzas are blank-line separated, each line a
//! single-letter key followed by `:` and a value.

use std::io::Read;

use serde_json::json;

#[derive(Debug, Clone, Default)]
pub struct ApkPackage {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub size: u64,
    pub checksum: String,
    pub url: String,
    pub license: String,
    pub depends: String,
    pub provides: String,
    pub origin: String,
    pub maintainer: String,
    pub description: String,
}

impl ApkPackage {
    pub fn filename(&self) -> String {
        format!("{}-{}.apk", self.name, self.version)
    }

    pub fn metadata_json(&self) -> serde_json::Value {
        json!({
            "license": self.license,
            "depends": self.depends,
            "provides": self.provides,
            "origin": self.origin,
            "maintainer": self.maintainer,
            "description": self.description,
            "url": self.url,
        })
    }
}

pub fn parse_stanzas(text: &str) -> Vec<ApkPackage> {
    let mut packages = Vec::new();
    let mut current = ApkPackage::default();
    let mut any_field = false;

    for line in text.lines() {
        if line.is_empty() {
            if any_field {
                packages.push(std::mem::take(&mut current));
                any_field = false;
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else { continue };
        any_field = true;
        match key {
            "P" => current.name = value.to_string(),
            "V" => current.version = value.to_string(),
            "A" => current.arch = value.to_string(),
            "S" => current.size = value.parse().unwrap_or(0),
            "C" => current.checksum = value.to_string(),
            "U" => current.url = value.to_string(),
            "L" => current.license = value.to_string(),
            "D" => current.depends = value.to_string(),
            "p" => current.provides = value.to_string(),
            "o" => current.origin = value.to_string(),
            "m" => current.maintainer = value.to_string(),
            "T" => current.description = value.to_string(),
            _ => {}
        }
    }
    if any_field {
        packages.push(current);
    }
    packages
}

pub fn write_stanzas(packages: &[ApkPackage]) -> String {
    let mut out = String::new();
    for pkg in packages {
        out.push_str(&format!("P:{}\n", pkg.name));
        out.push_str(&format!("V:{}\n", pkg.version));
        out.push_str(&format!("A:{}\n", pkg.arch));
        out.push_str(&format!("S:{}\n", pkg.size));
        if !pkg.checksum.is_empty() {
            out.push_str(&format!("C:{}\n", pkg.checksum));
        }
        if !pkg.url.is_empty() {
            out.push_str(&format!("U:{}\n", pkg.url));
        }
        if !pkg.license.is_empty() {
            out.push_str(&format!("L:{}\n", pkg.license));
        }
        if !pkg.origin.is_empty() {
            out.push_str(&format!("o:{}\n", pkg.origin));
        }
        if !pkg.maintainer.is_empty() {
            out.push_str(&format!("m:{}\n", pkg.maintainer));
        }
        if !pkg.description.is_empty() {
            out.push_str(&format!("T:{}\n", pkg.description));
        }
        if !pkg.depends.is_empty() {
            out.push_str(&format!("D:{}\n", pkg.depends));
        }
        if !pkg.provides.is_empty() {
            out.push_str(&format!("p:{}\n", pkg.provides));
        }
        out.push('\n');
    }
    out
}

/// Extracts the `APKINDEX` member out of an `APKINDEX.tar.gz` archive.
pub fn extract_index_text(tar_gz: &[u8]) -> std::io::Result<String> {
    let decoder = flate2::read::GzDecoder::new(tar_gz);
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == "APKINDEX" {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            return Ok(text);
        }
    }
    Ok(String::new())
}

/// Builds a fresh `APKINDEX.tar.gz` containing just the `APKINDEX` member.
/// Upstream archives also carry a `DESCRIPTION` member and, for signed
/// repositories, a detached `.SIGN.RSA.*` member prepended by `abuild-sign`;
/// this mirror republishes unsigned indexes (see the repository-wide GPG
/// signing note in the RPM/DEB plugins).
pub fn build_index_tar_gz(text: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let bytes = text.as_bytes();
    let mut header = tar::Header::new_gnu();
    header.set_path("APKINDEX")?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    let tar_bytes = builder.into_inner()?;

    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stanzas_separated_by_blank_lines() {
        let text = "P:musl\nV:1.2.3-r0\nA:x86_64\nS:100\n\nP:busybox\nV:1.35-r1\nA:x86_64\nS:200\n\n";
        let pkgs = parse_stanzas(text);
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].name, "musl");
        assert_eq!(pkgs[1].version, "1.35-r1");
    }

    #[test]
    fn tar_gz_roundtrips_index_text() {
        let text = "P:musl\nV:1.2.3-r0\nA:x86_64\nS:100\n\n";
        let archive = build_index_tar_gz(text).unwrap();
        let extracted = extract_index_text(&archive).unwrap();
        assert_eq!(extracted, text);
    }
}
