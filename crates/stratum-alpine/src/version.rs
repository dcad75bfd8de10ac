//! apk version ordering
//!
//! Versions look like `1.2.3`, `1.2.3a`, `1.2.3_rc1`, `1.2.3-r4`.
//! Numeric dot segments compare numerically, a trailing letter compares
//! after the digits, `_alpha`/`_beta`/`_pre`/`_rc` sort before the plain
//! release while `_cvs`/`_svn`/`_git`/`_hg`/`_p` sort after, and the
//! `-rN` build release breaks remaining ties.

use std::cmp::Ordering;

#[derive(Debug, Default, PartialEq, Eq)]
struct Parsed {
    parts: Vec<u64>,
    letter: Option<char>,
    suffixes: Vec<(i8, u64)>,
    release: u64,
}

fn suffix_rank(name: &str) -> Option<i8> {
    Some(match name {
        "alpha" => -4,
        "beta" => -3,
        "pre" => -2,
        "rc" => -1,
        "cvs" => 1,
        "svn" => 2,
        "git" => 3,
        "hg" => 4,
        "p" => 5,
        _ => return None,
    })
}

fn parse(v: &str) -> Parsed {
    let mut out = Parsed::default();

    // split off the build release
    let v = match v.rsplit_once("-r") {
        Some((head, rel)) if rel.chars().all(|c| c.is_ascii_digit()) && !rel.is_empty() => {
            out.release = rel.parse().unwrap_or(0);
            head
        }
        _ => v,
    };

    // split off _suffixes
    let mut pieces = v.split('_');
    let core = pieces.next().unwrap_or("");
    for s in pieces {
        let digits_at = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
        let (name, num) = s.split_at(digits_at);
        match suffix_rank(name) {
            Some(rank) => out.suffixes.push((rank, num.parse().unwrap_or(0))),
            // unknown suffix: keep ordering total by treating it as a
            // late post-release
            None => out.suffixes.push((i8::MAX, num.parse().unwrap_or(0))),
        }
    }

    // numeric segments with an optional trailing letter
    for seg in core.split('.') {
        let digits: String = seg.chars().take_while(|c| c.is_ascii_digit()).collect();
        out.parts.push(digits.parse().unwrap_or(0));
        if let Some(c) = seg.chars().nth(digits.len()) {
            if c.is_ascii_alphabetic() && out.letter.is_none() {
                out.letter = Some(c.to_ascii_lowercase());
            }
        }
    }
    out
}

/// Total order over apk version strings
pub fn compare(a: &str, b: &str) -> Ordering {
    let (a, b) = (parse(a), parse(b));

    let segments = a.parts.len().max(b.parts.len());
    for i in 0..segments {
        let x = a.parts.get(i).copied().unwrap_or(0);
        let y = b.parts.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    match (a.letter, b.letter) {
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(x), Some(y)) if x != y => return x.cmp(&y),
        _ => {}
    }

    let suffixes = a.suffixes.len().max(b.suffixes.len());
    for i in 0..suffixes {
        let x = a.suffixes.get(i).copied().unwrap_or((0, 0));
        let y = b.suffixes.get(i).copied().unwrap_or((0, 0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    a.release.cmp(&b.release)
}

/// True when an installed version sorts before the fixed one
pub fn is_older(installed: &str, fixed: &str) -> bool {
    compare(installed, fixed) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(a: &str, b: &str) {
        assert_eq!(compare(a, b), Ordering::Less, "{} < {}", a, b);
        assert_eq!(compare(b, a), Ordering::Greater, "{} > {}", b, a);
    }

    #[test]
    fn test_numeric_segments() {
        assert_eq!(compare("1.2.3", "1.2.3"), Ordering::Equal);
        lt("1.2.3", "1.2.4");
        lt("1.9.9", "2.0.0");
        lt("1.2", "1.2.1");
        lt("2.5.0", "2.9.0");
    }

    #[test]
    fn test_build_release() {
        assert_eq!(compare("1.2.3-r0", "1.2.3-r0"), Ordering::Equal);
        lt("1.2.3-r0", "1.2.3-r1");
        lt("2.5.0-r0", "2.9.0-r0");
    }

    #[test]
    fn test_trailing_letter() {
        lt("1.0.2", "1.0.2a");
        lt("1.0.2a", "1.0.2b");
    }

    #[test]
    fn test_pre_release_suffixes() {
        lt("1.2.3_alpha", "1.2.3_beta");
        lt("1.2.3_beta", "1.2.3_pre");
        lt("1.2.3_pre", "1.2.3_rc1");
        lt("1.2.3_rc1", "1.2.3");
        lt("1.2.3_rc1", "1.2.3_rc2");
    }

    #[test]
    fn test_post_release_suffixes() {
        lt("1.2.3", "1.2.3_p1");
        lt("1.2.3_git", "1.2.3_p1");
        lt("1.2.3_p1", "1.2.3_p2");
    }

    #[test]
    fn test_is_older() {
        assert!(is_older("2.5.0-r0", "2.9.0-r0"));
        assert!(!is_older("2.9.0-r0", "2.9.0-r0"));
        assert!(!is_older("2.9.1-r0", "2.9.0-r0"));
    }
}
