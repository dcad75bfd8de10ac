//! Python support
//!
//! A scanner for installed distributions (dist-info and egg-info
//! metadata) and the PyPI matcher, with PEP 440 version ordering.

mod matcher;
pub mod pep440;
mod scanner;

pub use matcher::PythonMatcher;
pub use scanner::{PythonPackageScanner, PythonRepoScanner, PYPI_REPOSITORY};

/// Normalize a distribution name per PEP 503
///
/// Runs of `-`, `_`, and `.` collapse to a single `-`; comparison is
/// case-insensitive. Feeds and scanners both normalize so store lookups
/// can be plain equality.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            dash = true;
            continue;
        }
        if dash && !out.is_empty() {
            out.push('-');
        }
        dash = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Django"), "django");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("ruamel_yaml--clib"), "ruamel-yaml-clib");
    }
}
