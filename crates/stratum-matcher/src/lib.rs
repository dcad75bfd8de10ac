//! Matchers and the matching engine
//!
//! A matcher claims index records via `filter`, names the store lookup it
//! wants via `query`, and makes the final call in `vulnerable`, usually
//! with an ecosystem-specific version ordering. The engine fans an index
//! report across every matcher, bulk-fetches candidates from the live
//! snapshot, evaluates pairs on a worker pool, and finishes with the
//! enricher chain.

mod engine;

pub use engine::MatchingEngine;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;

use stratum_core::{
    CancelToken, IndexRecord, MatchConstraint, Vulnerability, VulnerabilityReport,
};

/// Sentinel `fixed_in_version` marking a record as pending triage;
/// treated as not vulnerable
pub const FIXED_IN_SENTINEL: &str = "0";

/// Per-ecosystem matching logic
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Claim the records this matcher understands
    fn filter(&self, record: &IndexRecord) -> bool;

    /// Fields the store must match exactly when looking up candidates
    fn query(&self) -> Vec<MatchConstraint>;

    /// Final decision for one (record, candidate) pair
    fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool>;
}

/// A matcher backed by an online service instead of the local store
///
/// Remote matchers run under a per-request timeout and may never fail a
/// report: on error the engine logs and takes the empty result.
pub trait RemoteMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Map package id to the vulnerabilities the service reports
    fn query_remote(
        &self,
        cancel: &CancelToken,
        records: &[IndexRecord],
        timeout: Duration,
    ) -> Result<HashMap<String, Vec<Vulnerability>>>;
}

/// Callback handed to enrichers for reading previously-indexed
/// enrichment records by tag
pub trait EnrichmentGetter {
    fn get(&self, tags: &[String]) -> Result<Vec<serde_json::Value>>;
}

/// Side-channel metadata provider run after matching
pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce opaque blobs to attach under this enricher's name
    fn enrich(
        &self,
        getter: &dyn EnrichmentGetter,
        report: &VulnerabilityReport,
    ) -> Result<Vec<serde_json::Value>>;
}

/// The standard decision rule
///
/// - empty `fixed_in_version` ⇒ the whole range is vulnerable
/// - the `"0"` sentinel ⇒ not vulnerable
/// - otherwise vulnerable iff `cmp(installed, fixed_in)` is `Less`
///
/// always ANDed with the vulnerability's architecture operation. `cmp`
/// returning `None` (unparseable version) counts as not vulnerable.
pub fn default_vulnerable(
    record: &IndexRecord,
    vuln: &Vulnerability,
    cmp: impl Fn(&str, &str) -> Option<Ordering>,
) -> bool {
    let vuln_arch = vuln
        .package
        .as_ref()
        .map(|p| p.arch.as_str())
        .unwrap_or("");
    if !vuln
        .arch_operation
        .cmp(record.package.arch.as_str(), vuln_arch)
    {
        return false;
    }
    match vuln.fixed_in_version.as_str() {
        "" => true,
        FIXED_IN_SENTINEL => false,
        fixed => matches!(cmp(&record.package.version, fixed), Some(Ordering::Less)),
    }
}
