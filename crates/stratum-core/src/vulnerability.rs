//! Vulnerabilities and severity normalization

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::package::{Distribution, Package, Repository};

/// Severity normalized across feeds
///
/// Ordering is by urgency, so `Critical` compares greatest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    #[default]
    Unknown,
    Negligible,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "Unknown",
            Severity::Negligible => "Negligible",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = std::convert::Infallible;

    /// Lenient parse covering the vocabulary the shipped feeds use.
    /// Anything unrecognized normalizes to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "negligible" | "unimportant" => Severity::Negligible,
            "low" | "minor" => Severity::Low,
            "medium" | "moderate" => Severity::Medium,
            "high" | "important" | "major" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Unknown,
        })
    }
}

/// How a vulnerability's architecture constrains matching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchOp {
    #[default]
    Ignore,
    Equals,
    NotEquals,
    PatternMatch,
}

impl ArchOp {
    /// Compare a record's architecture against a vulnerability's
    ///
    /// An empty vulnerability arch never constrains. A pattern that fails
    /// to compile matches nothing.
    pub fn cmp(&self, record_arch: &str, vuln_arch: &str) -> bool {
        if vuln_arch.is_empty() {
            return true;
        }
        match self {
            ArchOp::Ignore => true,
            ArchOp::Equals => record_arch == vuln_arch,
            ArchOp::NotEquals => record_arch != vuln_arch,
            ArchOp::PatternMatch => regex::Regex::new(vuln_arch)
                .map(|re| re.is_match(record_arch))
                .unwrap_or(false),
        }
    }
}

/// Index-record fields a matcher can require equality on
///
/// A matcher names the constraints; the store turns them into indexed
/// lookups. The set is closed: adding a member means adding a column
/// mapping in every store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchConstraint {
    DistributionDID,
    DistributionName,
    DistributionVersion,
    DistributionVersionID,
    DistributionVersionCodeName,
    DistributionPrettyName,
    DistributionArch,
    DistributionCPE,
    PackageModule,
    RepositoryName,
}

/// One vulnerability as recorded by an updater
///
/// An empty `fixed_in_version` means the entire version range is
/// vulnerable. The literal `"0"` is a pending-triage sentinel and is
/// treated as not actionable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(default)]
    pub id: String,
    pub updater: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Space-separated advisory links
    #[serde(default)]
    pub links: String,
    /// Severity string as the feed reported it
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub normalized_severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Package>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<Repository>,
    #[serde(default)]
    pub fixed_in_version: String,
    #[serde(default)]
    pub arch_operation: ArchOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,
}

impl Vulnerability {
    /// Content hash over all semantic fields
    ///
    /// Identical vulnerabilities across update operations hash alike so
    /// the store deduplicates their rows.
    pub fn content_hash(&self) -> String {
        let mut h = Sha256::new();
        let mut put = |s: &str| {
            h.update(s.as_bytes());
            h.update([0u8]);
        };
        put(&self.updater);
        put(&self.name);
        put(&self.description);
        put(&self.links);
        put(&self.severity);
        put(self.normalized_severity.as_str());
        if let Some(p) = &self.package {
            put(&p.name);
            put(&p.version);
            put(&p.module.clone().unwrap_or_default());
            put(&p.arch);
            put(p.kind.as_str());
        }
        if let Some(d) = &self.dist {
            put(&d.did);
            put(&d.name);
            put(&d.version);
            put(&d.version_code_name);
            put(&d.version_id);
            put(&d.arch);
            put(&d.cpe.clone().unwrap_or_default());
            put(&d.pretty_name);
        }
        if let Some(r) = &self.repo {
            put(&r.name);
            put(&r.key);
            put(&r.uri);
        }
        put(&self.fixed_in_version);
        put(&format!("{:?}", self.arch_operation));
        hex::encode(h.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parsing() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("Important".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!("moderate".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("unimportant".parse::<Severity>().unwrap(), Severity::Negligible);
        assert_eq!("wat".parse::<Severity>().unwrap(), Severity::Unknown);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Negligible > Severity::Unknown);
    }

    #[test]
    fn test_arch_op() {
        assert!(ArchOp::Ignore.cmp("x86_64", "aarch64"));
        assert!(ArchOp::Equals.cmp("x86_64", "x86_64"));
        assert!(!ArchOp::Equals.cmp("x86_64", "aarch64"));
        assert!(ArchOp::NotEquals.cmp("x86_64", "aarch64"));
        assert!(ArchOp::PatternMatch.cmp("x86_64", "x86_64|aarch64"));
        assert!(!ArchOp::PatternMatch.cmp("s390x", "x86_64|aarch64"));
        // empty vuln arch never constrains
        assert!(ArchOp::Equals.cmp("x86_64", ""));
    }

    #[test]
    fn test_content_hash_is_stable_and_discriminating() {
        let v = Vulnerability {
            updater: "alpine-3.10-main-updater".to_string(),
            name: "CVE-2018-20187".to_string(),
            fixed_in_version: "2.9.0-r0".to_string(),
            ..Default::default()
        };
        assert_eq!(v.content_hash(), v.clone().content_hash());
        let mut w = v.clone();
        w.fixed_in_version = "2.9.1-r0".to_string();
        assert_ne!(v.content_hash(), w.content_hash());
        // id is not semantic
        let mut x = v.clone();
        x.id = "42".to_string();
        assert_eq!(v.content_hash(), x.content_hash());
    }
}
