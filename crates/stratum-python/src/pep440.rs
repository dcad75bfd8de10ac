//! PEP 440 version ordering
//!
//! Parses the public version scheme
//! `[N!]N(.N)*[{a|b|rc}N][.postN][.devN][+local]` and orders it the way
//! pip does: dev < pre-release < final < post-release, with the local
//! segment ignored. Strings outside the scheme do not parse, and the
//! matcher treats them as never vulnerable rather than guessing.

use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(
        r"(?ix) ^ v?
        (?: (?P<epoch>\d+) ! )?
        (?P<release>\d+ (?: \.\d+ )*)
        (?: [._-]? (?P<pre_l>a|alpha|b|beta|c|rc|pre|preview) [._-]? (?P<pre_n>\d*) )?
        (?: [._-]? (?:post|rev|r) [._-]? (?P<post_n>\d*) )?
        (?: [._-]? dev [._-]? (?P<dev_n>\d*) )?
        (?: \+ (?P<local>[a-z0-9]+ (?: [._-] [a-z0-9]+ )* ) )?
        $"
    )
    .expect("static regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    /// (phase, number): a=0, b=1, rc=2
    pre: Option<(u8, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

impl Version {
    /// Parse a PEP 440 version; `None` when the string is out of scheme
    pub fn parse(s: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(s.trim())?;
        let epoch = caps
            .name("epoch")
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let release = caps
            .name("release")?
            .as_str()
            .split('.')
            .map(|p| p.parse().unwrap_or(0))
            .collect();
        let pre = caps.name("pre_l").map(|l| {
            let phase = match l.as_str().to_ascii_lowercase().as_str() {
                "a" | "alpha" => 0,
                "b" | "beta" => 1,
                _ => 2,
            };
            let n = caps
                .name("pre_n")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            (phase, n)
        });
        // a bare "post"/"dev" captures an empty number group, which
        // reads as 0; an absent group reads as absent
        let number = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str().parse().unwrap_or(0))
        };
        let post = number("post_n");
        let dev = number("dev_n");
        Some(Self {
            epoch,
            release,
            pre,
            post,
            dev,
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_release(&self.release, &other.release))
            .then_with(|| pre_key(self).cmp(&pre_key(other)))
            .then_with(|| post_key(self).cmp(&post_key(other)))
            .then_with(|| dev_key(self).cmp(&dev_key(other)))
    }
}

fn cmp_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// dev-only sorts below pre-releases, which sort below the final
fn pre_key(v: &Version) -> (i8, u8, u64) {
    match (v.pre, v.post, v.dev) {
        (Some((phase, n)), _, _) => (-1, phase, n),
        (None, None, Some(_)) => (-2, 0, 0),
        _ => (0, 0, 0),
    }
}

fn post_key(v: &Version) -> (u8, u64) {
    match v.post {
        Some(n) => (1, n),
        None => (0, 0),
    }
}

/// dev sorts before the corresponding non-dev version
fn dev_key(v: &Version) -> (u8, u64) {
    match v.dev {
        Some(n) => (0, n),
        None => (1, 0),
    }
}

/// Compare two version strings; `None` when either is out of scheme
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    Some(Version::parse(a)?.cmp(&Version::parse(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(a: &str, b: &str) {
        assert_eq!(compare(a, b), Some(Ordering::Less), "{} < {}", a, b);
        assert_eq!(compare(b, a), Some(Ordering::Greater), "{} > {}", b, a);
    }

    #[test]
    fn test_release_ordering() {
        assert_eq!(compare("1.0", "1.0.0"), Some(Ordering::Equal));
        lt("1.0", "1.0.1");
        lt("1.9", "1.10");
        lt("2.28", "2.31");
    }

    #[test]
    fn test_epoch() {
        lt("2.0", "1!1.0");
        lt("1!1.0", "2!0.1");
    }

    #[test]
    fn test_pre_releases() {
        lt("1.0a1", "1.0a2");
        lt("1.0a2", "1.0b1");
        lt("1.0b1", "1.0rc1");
        lt("1.0rc1", "1.0");
        lt("1.0.dev1", "1.0a1");
        lt("1.0a1.dev1", "1.0a1");
    }

    #[test]
    fn test_post_and_dev() {
        lt("1.0", "1.0.post1");
        lt("1.0.post1", "1.0.post2");
        lt("1.0.dev1", "1.0");
        lt("1.0.post1.dev1", "1.0.post1");
        lt("1.0", "1.1.dev1");
    }

    #[test]
    fn test_spelling_variants() {
        assert_eq!(compare("1.0alpha1", "1.0a1"), Some(Ordering::Equal));
        assert_eq!(compare("1.0-rc-1", "1.0rc1"), Some(Ordering::Equal));
        assert_eq!(compare("v1.0", "1.0"), Some(Ordering::Equal));
    }

    #[test]
    fn test_local_segment_is_ignored() {
        assert_eq!(compare("1.0+local.1", "1.0"), Some(Ordering::Equal));
    }

    #[test]
    fn test_out_of_scheme_does_not_parse() {
        assert!(Version::parse("not-a-version").is_none());
        assert!(compare("1.0", "junk").is_none());
    }
}
