//! Debian version ordering: `[epoch:]upstream-version[-debian-revision]`,
//! comparing epoch numerically then running dpkg's character-class
//! comparison over `upstream-version` and `debian-revision` in turn.

use std::cmp::Ordering;

use packmirror_plugin_api::VersionOrd;

pub fn split_version(v: &str) -> (u64, String, String) {
    let (epoch, rest) = match v.split_once(':') {
        Some((e, rest)) => (e.parse().unwrap_or(0), rest),
        None => (0, v),
    };
    match rest.rsplit_once('-') {
        Some((upstream, revision)) => (epoch, upstream.to_string(), revision.to_string()),
        None => (epoch, rest.to_string(), "0".to_string()),
    }
}

/// dpkg's character order for the non-digit runs: `~` sorts below
/// everything (even the end of string); letters sort by ASCII value;
/// everything else sorts above letters.
fn char_order(c: Option<char>) -> i32 {
    match c {
        None => -1,
        Some('~') => -2,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

fn compare_non_digit(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars();
    let mut bi = b.chars();
    loop {
        let ac = ai.next();
        let bc = bi.next();
        if ac.is_none() && bc.is_none() {
            return Ordering::Equal;
        }
        let ord = char_order(ac).cmp(&char_order(bc));
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn compare_digit(a: &str, b: &str) -> Ordering {
    let a_num: u64 = a.parse().unwrap_or(0);
    let b_num: u64 = b.parse().unwrap_or(0);
    a_num.cmp(&b_num)
}

/// Compares one `upstream-version`-or-`debian-revision` component:
/// alternating non-digit/digit runs, starting with a (possibly empty)
/// non-digit run.
pub fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a = a;
    let mut b = b;
    loop {
        let a_nd_len = a.find(|c: char| c.is_ascii_digit()).unwrap_or(a.len());
        let b_nd_len = b.find(|c: char| c.is_ascii_digit()).unwrap_or(b.len());
        let (a_nd, a_rest) = a.split_at(a_nd_len);
        let (b_nd, b_rest) = b.split_at(b_nd_len);
        let ord = compare_non_digit(a_nd, b_nd);
        if ord != Ordering::Equal {
            return ord;
        }
        a = a_rest;
        b = b_rest;

        if a.is_empty() && b.is_empty() {
            return Ordering::Equal;
        }

        let a_d_len = a.find(|c: char| !c.is_ascii_digit()).unwrap_or(a.len());
        let b_d_len = b.find(|c: char| !c.is_ascii_digit()).unwrap_or(b.len());
        let (a_d, a_rest) = a.split_at(a_d_len);
        let (b_d, b_rest) = b.split_at(b_d_len);
        let ord = compare_digit(a_d, b_d);
        if ord != Ordering::Equal {
            return ord;
        }
        a = a_rest;
        b = b_rest;
        if a.is_empty() && b.is_empty() {
            return Ordering::Equal;
        }
    }
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (ea, ua, ra) = split_version(a);
    let (eb, ub, rb) = split_version(b);
    ea.cmp(&eb)
        .then_with(|| compare_component(&ua, &ub))
        .then_with(|| compare_component(&ra, &rb))
}

pub struct DebVersionOrd;

impl VersionOrd for DebVersionOrd {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        compare_versions(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_dominates() {
        assert_eq!(compare_versions("1:1.0-1", "2.0-1"), Ordering::Greater);
    }

    #[test]
    fn tilde_sorts_lowest() {
        assert_eq!(compare_versions("1.0~beta1", "1.0"), Ordering::Less);
    }

    #[test]
    fn numeric_revision_compares_by_value() {
        assert_eq!(compare_versions("1.0-9", "1.0-10"), Ordering::Less);
    }

    #[test]
    fn identical_versions_equal() {
        assert_eq!(compare_versions("2:1.0-1", "2:1.0-1"), Ordering::Equal);
    }
}
