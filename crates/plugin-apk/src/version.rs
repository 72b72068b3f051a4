//! Alpine (`apk`) version ordering. Similar in spirit to the RPM/Debian
//! comparators — alternating digit/non-digit runs — but Alpine
//! versions additionally carry a `_suffix<n>` (`_alpha`, `_beta`,
//! `_pre`, `_rc`, `_cvs`, `_svn`, `_git`, `_hg`, `_p`) ahead of an
//! optional `-r<n>` package-release counter.

use std::cmp::Ordering;

use packmirror_plugin_api::VersionOrd;

const SUFFIX_ORDER: &[&str] = &["alpha", "beta", "pre", "rc", "", "cvs", "svn", "git", "hg", "p"];

fn suffix_rank(name: &str) -> i32 {
    SUFFIX_ORDER
        .iter()
        .position(|s| *s == name)
        .map(|i| i as i32)
        .unwrap_or(SUFFIX_ORDER.len() as i32)
}

/// Splits `<main>[_suffix<n>]...[-r<release>]` into `(main, suffixes, release)`.
fn split(v: &str) -> (String, Vec<(String, u64)>, u64) {
    let (core, release) = match v.rsplit_once("-r") {
        Some((core, rel)) if rel.chars().all(|c| c.is_ascii_digit()) && !rel.is_empty() => {
            (core, rel.parse().unwrap_or(0))
        }
        _ => (v, 0),
    };
    let mut parts = core.split('_');
    let main = parts.next().unwrap_or("").to_string();
    let mut suffixes = Vec::new();
    for part in parts {
        let split_at = part.find(|c: char| c.is_ascii_digit()).unwrap_or(part.len());
        let (name, num) = part.split_at(split_at);
        suffixes.push((name.to_string(), num.parse().unwrap_or(0)));
    }
    (main, suffixes, release)
}

fn compare_main(a: &str, b: &str) -> Ordering {
    let mut a = a;
    let mut b = b;
    loop {
        if a.is_empty() && b.is_empty() {
            return Ordering::Equal;
        }
        let a_digit = a.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);
        let b_digit = b.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);

        let a_end = a
            .char_indices()
            .find(|(_, c)| (c.is_ascii_digit() != a_digit) || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(a.len());
        let b_end = b
            .char_indices()
            .find(|(_, c)| (c.is_ascii_digit() != b_digit) || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(b.len());
        let (a_seg, a_rest) = a.split_at(a_end);
        let (b_seg, b_rest) = b.split_at(b_end);

        let ord = if a_digit && b_digit {
            let an: u128 = a_seg.parse().unwrap_or(0);
            let bn: u128 = b_seg.parse().unwrap_or(0);
            an.cmp(&bn)
        } else {
            a_seg.cmp(b_seg)
        };
        if ord != Ordering::Equal {
            return ord;
        }
        a = a_rest.trim_start_matches('.');
        b = b_rest.trim_start_matches('.');
    }
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (ma, sa, ra) = split(a);
    let (mb, sb, rb) = split(b);
    compare_main(&ma, &mb)
        .then_with(|| {
            let a_rank = sa.first().map(|(n, _)| suffix_rank(n)).unwrap_or(suffix_rank(""));
            let b_rank = sb.first().map(|(n, _)| suffix_rank(n)).unwrap_or(suffix_rank(""));
            a_rank.cmp(&b_rank)
        })
        .then_with(|| {
            let a_num = sa.first().map(|(_, n)| *n).unwrap_or(0);
            let b_num = sb.first().map(|(_, n)| *n).unwrap_or(0);
            a_num.cmp(&b_num)
        })
        .then_with(|| ra.cmp(&rb))
}

pub struct ApkVersionOrd;

impl VersionOrd for ApkVersionOrd {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        compare_versions(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_counter_breaks_ties() {
        assert_eq!(compare_versions("1.2.3-r1", "1.2.3-r2"), Ordering::Less);
    }

    #[test]
    fn numeric_segments_compare_by_value() {
        assert_eq!(compare_versions("1.9", "1.10"), Ordering::Less);
    }

    #[test]
    fn pre_releases_sort_below_final() {
        assert_eq!(compare_versions("1.0_pre1", "1.0"), Ordering::Less);
    }
}
