//! Packages, distributions, and repositories
//!
//! The three legs of an [`IndexRecord`](crate::report::IndexRecord):
//! what is installed, which OS it is installed on, and where it came from.

use serde::{Deserialize, Serialize};

/// Whether a package is a binary artifact or the source it was built from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    Binary,
    Source,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Binary => "binary",
            PackageKind::Source => "source",
        }
    }
}

/// An installed package observed in a layer
///
/// Identity within an inventory is (name, version, arch, package_db).
/// The `id` is assigned when the package is placed in a report and is
/// meaningless outside of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub kind: PackageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<Package>>,
    /// Locator of the database this package was read from,
    /// e.g. `lib/apk/db/installed`
    #[serde(default)]
    pub package_db: String,
    /// Opaque per-feed hint, e.g. an apk commit or repo id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_hint: Option<String>,
    /// Module/namespace for language packages, e.g. a Maven group id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub arch: String,
    /// Path of the artifact that produced this package, for language
    /// scanners walking the filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
}

impl Package {
    /// Identity key within one inventory
    pub fn identity_key(&self) -> String {
        format!(
            "{}\x00{}\x00{}\x00{}",
            self.name, self.version, self.arch, self.package_db
        )
    }
}

/// An operating-system distribution
///
/// Identity is (did, version). Values are interned per family in a
/// process-wide map; equality is by value so callers never depend on
/// interning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution {
    /// Machine-readable identifier, the os-release `ID` field
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub version_code_name: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpe: Option<String>,
    #[serde(default)]
    pub pretty_name: String,
}

impl Distribution {
    /// Identity key: identifier plus version
    pub fn identity_key(&self) -> String {
        format!("{}\x00{}", self.did, self.version)
    }
}

/// A source of packages: an apk repo, PyPI, Maven Central, ...
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpe: Option<String>,
}

impl Repository {
    pub fn identity_key(&self) -> String {
        format!("{}\x00{}\x00{}", self.name, self.key, self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_identity_ignores_id() {
        let a = Package {
            id: "1".to_string(),
            name: "musl".to_string(),
            version: "1.2.4-r2".to_string(),
            arch: "x86_64".to_string(),
            package_db: "lib/apk/db/installed".to_string(),
            ..Default::default()
        };
        let mut b = a.clone();
        b.id = "7".to_string();
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn test_distribution_equality_is_by_value() {
        let a = Distribution {
            did: "alpine".to_string(),
            name: "Alpine Linux".to_string(),
            version: "3.10".to_string(),
            version_id: "3.10".to_string(),
            pretty_name: "Alpine Linux v3.10".to_string(),
            ..Default::default()
        };
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.identity_key(), b.identity_key());
    }
}
