//! `Release`/`InRelease` parsing: codename, components, architectures,
//! and the per-file SHA256/size/path triples listed under `SHA256:`.

use crate::paragraph::{field, parse_paragraphs};
use crate::DebPluginError;

#[derive(Debug, Clone, Default)]
pub struct ReleaseFile {
    pub codename: String,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub entries: Vec<ReleaseEntry>,
}

#[derive(Debug, Clone)]
pub struct ReleaseEntry {
    pub sha256: String,
    pub size: u64,
    pub path: String,
}

/// `InRelease` is the same paragraph shape as `Release` with an
/// inline OpenPGP clearsign wrapper; strip the `-----BEGIN/END PGP...-----`
/// armor before parsing, we never verify the signature.
pub fn strip_pgp_armor(text: &str) -> &str {
    let start = text
        .find("-----BEGIN PGP SIGNED MESSAGE-----")
        .map(|i| {
            text[i..]
                .find("\n\n")
                .map(|off| i + off + 2)
                .unwrap_or(i)
        })
        .unwrap_or(0);
    let end = text.find("-----BEGIN PGP SIGNATURE-----").unwrap_or(text.len());
    text[start..end].trim_end()
}

pub fn parse(text: &str) -> Result<ReleaseFile, DebPluginError> {
    let body = strip_pgp_armor(text);
    let paragraphs = parse_paragraphs(body);
    let p = paragraphs
        .first()
        .ok_or_else(|| DebPluginError::Parse("empty Release document".to_string()))?;

    let codename = field(p, "codename").unwrap_or_default().to_string();
    let components = field(p, "components")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let architectures = field(p, "architectures")
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut entries = Vec::new();
    if let Some(sha256_block) = field(p, "sha256") {
        for line in sha256_block.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() == 3 {
                entries.push(ReleaseEntry {
                    sha256: parts[0].to_string(),
                    size: parts[1].parse().unwrap_or(0),
                    path: parts[2].to_string(),
                });
            }
        }
    }

    Ok(ReleaseFile {
        codename,
        components,
        architectures,
        entries,
    })
}

/// Renders a filtered-mode `Release` listing exactly the generated
/// `Packages*` files, in the same `SHA256:` stanza shape as upstream.
pub fn write(codename: &str, components: &[String], architectures: &[String], entries: &[ReleaseEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Codename: {codename}\n"));
    out.push_str(&format!("Components: {}\n", components.join(" ")));
    out.push_str(&format!("Architectures: {}\n", architectures.join(" ")));
    out.push_str("SHA256:\n");
    for e in entries {
        out.push_str(&format!(" {} {} {}\n", e.sha256, e.size, e.path));
    }
    out
}
