//! RPM NEVRA version ordering: compare `epoch` numerically, then
//! `version`, then `release`, each using the standard RPM segment
//! comparator (digits compared numerically, letters lexicographically,
//! `~` sorting lower than everything, including the empty string).

use std::cmp::Ordering;

use packmirror_plugin_api::VersionOrd;

/// Parses `[epoch:]version[-release]` into its three parts. A missing
/// epoch defaults to `0`, matching RPM's own convention.
pub fn split_evr(evr: &str) -> (u64, String, String) {
    let (epoch, rest) = match evr.split_once(':') {
        Some((e, rest)) => (e.parse().unwrap_or(0), rest),
        None => (0, evr),
    };
    match rest.rsplit_once('-') {
        Some((version, release)) => (epoch, version.to_string(), release.to_string()),
        None => (epoch, rest.to_string(), String::new()),
    }
}

/// The `rpmvercmp` segment comparator: alternating runs of digits and
/// non-digits are compared piece by piece, numeric runs numerically
/// (leading zeros stripped), everything else lexicographically. A `~`
/// sorts below any other character, including past the end of string.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    let mut a = a;
    let mut b = b;
    loop {
        a = a.trim_start_matches(|c: char| !c.is_ascii_alphanumeric() && c != '~');
        b = b.trim_start_matches(|c: char| !c.is_ascii_alphanumeric() && c != '~');

        if a.starts_with('~') || b.starts_with('~') {
            match (a.starts_with('~'), b.starts_with('~')) {
                (true, true) => {
                    a = &a[1..];
                    b = &b[1..];
                    continue;
                }
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                (false, false) => unreachable!(),
            }
        }

        if a.is_empty() || b.is_empty() {
            break;
        }

        let a_digit = a.chars().next().unwrap().is_ascii_digit();
        let b_digit = b.chars().next().unwrap().is_ascii_digit();

        // If one side's run-kind doesn't match (digit vs alpha), numeric
        // segments always outrank alphabetic ones.
        if a_digit != b_digit {
            return if a_digit { Ordering::Greater } else { Ordering::Less };
        }

        let (a_seg, a_rest) = take_segment(a, a_digit);
        let (b_seg, b_rest) = take_segment(b, b_digit);

        let ord = if a_digit {
            let a_trim = a_seg.trim_start_matches('0');
            let b_trim = b_seg.trim_start_matches('0');
            if a_trim.len() != b_trim.len() {
                a_trim.len().cmp(&b_trim.len())
            } else {
                a_trim.cmp(b_trim)
            }
        } else {
            a_seg.cmp(b_seg)
        };
        if ord != Ordering::Equal {
            return ord;
        }
        a = a_rest;
        b = b_rest;
    }
    a.len().cmp(&b.len())
}

fn take_segment(s: &str, digit: bool) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit() != digit || *c == '~')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(end)
}

/// Compares two `[epoch:]version[-release]` strings.
pub fn compare_evr(a: &str, b: &str) -> Ordering {
    let (ea, va, ra) = split_evr(a);
    let (eb, vb, rb) = split_evr(b);
    ea.cmp(&eb)
        .then_with(|| rpmvercmp(&va, &vb))
        .then_with(|| rpmvercmp(&ra, &rb))
}

pub struct RpmVersionOrd;

impl VersionOrd for RpmVersionOrd {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        compare_evr(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_dominates() {
        assert_eq!(compare_evr("1:1.2.3-1", "1.2.4-1"), Ordering::Greater);
    }

    #[test]
    fn tilde_sorts_below_release() {
        assert_eq!(compare_evr("1.0~rc1", "1.0"), Ordering::Less);
    }

    #[test]
    fn shorter_numeric_string_is_smaller() {
        assert_eq!(compare_evr("1.0", "1.0.0"), Ordering::Less);
    }

    #[test]
    fn numeric_segments_compare_by_value_not_length() {
        assert_eq!(compare_evr("2.el9", "10.el9"), Ordering::Less);
    }

    #[test]
    fn identical_versions_are_equal() {
        assert_eq!(compare_evr("1:2.0-3", "1:2.0-3"), Ordering::Equal);
    }
}
