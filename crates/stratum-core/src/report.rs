//! Index and vulnerability reports

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::package::{Distribution, Package, Repository};
use crate::vulnerability::Vulnerability;

/// State machine of an index operation
///
/// `Indexing` transitions to exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Indexing,
    IndexFinished,
    IndexError,
}

impl IndexState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IndexState::IndexFinished | IndexState::IndexError)
    }
}

/// Where a package was observed within the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub package_db: String,
    /// Digest of the layer that introduced the package
    pub introduced_in: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_id: Option<String>,
    #[serde(default)]
    pub repository_ids: Vec<String>,
}

/// The coalesced inventory of one image
///
/// Maps are keyed by report-local id strings. BTree maps keep the report
/// deterministic: identical layer artifacts always produce bit-identical
/// JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub manifest_hash: Digest,
    pub state: IndexState,
    #[serde(default)]
    pub packages: BTreeMap<String, Package>,
    #[serde(default)]
    pub distributions: BTreeMap<String, Distribution>,
    #[serde(default)]
    pub repositories: BTreeMap<String, Repository>,
    #[serde(default)]
    pub environments: BTreeMap<String, Vec<Environment>>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl IndexReport {
    /// Fresh report in the `Indexing` state
    pub fn new(manifest_hash: Digest) -> Self {
        Self {
            manifest_hash,
            state: IndexState::Indexing,
            packages: BTreeMap::new(),
            distributions: BTreeMap::new(),
            repositories: BTreeMap::new(),
            environments: BTreeMap::new(),
            success: false,
            err: None,
        }
    }

    /// Flatten the report into records for the matching engine
    ///
    /// One record per (package, environment) pair, with the environment's
    /// distribution and first repository resolved. A package with no
    /// recorded environment still yields one bare record.
    pub fn index_records(&self) -> Vec<IndexRecord> {
        let mut out = Vec::new();
        for (id, pkg) in &self.packages {
            match self.environments.get(id) {
                Some(envs) if !envs.is_empty() => {
                    for env in envs {
                        let distribution = env
                            .distribution_id
                            .as_ref()
                            .and_then(|d| self.distributions.get(d))
                            .cloned();
                        let repository = env
                            .repository_ids
                            .first()
                            .and_then(|r| self.repositories.get(r))
                            .cloned();
                        out.push(IndexRecord {
                            package: pkg.clone(),
                            distribution,
                            repository,
                        });
                    }
                }
                _ => out.push(IndexRecord {
                    package: pkg.clone(),
                    distribution: None,
                    repository: None,
                }),
            }
        }
        out
    }
}

/// The unit of matching: a package in its distribution/repository context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub package: Package,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
}

/// Final output of the matching engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityReport {
    pub manifest_hash: Option<Digest>,
    #[serde(default)]
    pub packages: BTreeMap<String, Package>,
    #[serde(default)]
    pub distributions: BTreeMap<String, Distribution>,
    #[serde(default)]
    pub repositories: BTreeMap<String, Repository>,
    #[serde(default)]
    pub environments: BTreeMap<String, Vec<Environment>>,
    /// All matched vulnerabilities, keyed by report-local id
    #[serde(default)]
    pub vulnerabilities: BTreeMap<String, Vulnerability>,
    /// Package id to the vulnerability ids affecting it
    #[serde(default)]
    pub package_vulnerabilities: BTreeMap<String, Vec<String>>,
    /// Enricher name to opaque JSON blobs
    #[serde(default)]
    pub enrichments: BTreeMap<String, Vec<serde_json::Value>>,
    /// Per-matcher/per-enricher failures that degraded this report
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> Digest {
        "sha256:25fd87072f39aaebd1ee24dca825e61d9f5a0f87966c01551d31a4d8d79d37d8"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        assert!(!IndexState::Indexing.is_terminal());
        assert!(IndexState::IndexFinished.is_terminal());
        assert!(IndexState::IndexError.is_terminal());
    }

    #[test]
    fn test_index_records_resolve_environment() {
        let mut report = IndexReport::new(digest());
        report.packages.insert(
            "1".to_string(),
            Package {
                id: "1".to_string(),
                name: "botan".to_string(),
                version: "2.5.0-r0".to_string(),
                ..Default::default()
            },
        );
        report.distributions.insert(
            "1".to_string(),
            Distribution {
                did: "alpine".to_string(),
                version_id: "3.10".to_string(),
                ..Default::default()
            },
        );
        report.environments.insert(
            "1".to_string(),
            vec![Environment {
                package_db: "lib/apk/db/installed".to_string(),
                introduced_in: digest(),
                distribution_id: Some("1".to_string()),
                repository_ids: vec![],
            }],
        );

        let records = report.index_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].package.name, "botan");
        assert_eq!(
            records[0].distribution.as_ref().unwrap().version_id,
            "3.10"
        );
    }

    #[test]
    fn test_index_records_without_environment() {
        let mut report = IndexReport::new(digest());
        report.packages.insert(
            "1".to_string(),
            Package {
                id: "1".to_string(),
                name: "left-pad".to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
        );
        let records = report.index_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].distribution.is_none());
    }
}
