//! RFC 822 (deb822) paragraph scanner shared by `Release`/`InRelease`
//! and `Packages` parsing. Hand-rolled: the stack this plugin is built
//! from has no deb822 crate, and a small scanner matches the grain of
//! how offline package mirrors in the wild parse this format.

/// One paragraph: field name (lowercased) -> raw value, continuation
/// lines (starting with whitespace) folded into the previous value with
/// embedded newlines preserved.
pub type Paragraph = Vec<(String, String)>;

pub fn parse_paragraphs(text: &str) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut current: Paragraph = Vec::new();
    let mut last_field: Option<usize> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
                last_field = None;
            }
            continue;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && !current.is_empty() {
            if let Some(idx) = last_field {
                current[idx].1.push('\n');
                current[idx].1.push_str(line.trim_start());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            current.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            last_field = Some(current.len() - 1);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

pub fn field<'a>(p: &'a Paragraph, name: &str) -> Option<&'a str> {
    p.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}
