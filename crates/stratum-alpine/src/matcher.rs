//! Alpine matcher

use anyhow::Result;

use stratum_core::{IndexRecord, MatchConstraint, Vulnerability};
use stratum_matcher::{default_vulnerable, Matcher};

use crate::version;

/// Matches apk packages against secdb-sourced vulnerabilities
///
/// Candidates are constrained to the record's distribution branch; the
/// decision is the standard rule under apk version ordering, so an empty
/// fixed version is always vulnerable and the `"0"` pending-triage
/// sentinel never is.
#[derive(Debug, Default)]
pub struct AlpineMatcher;

impl Matcher for AlpineMatcher {
    fn name(&self) -> &'static str {
        "alpine-matcher"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .distribution
            .as_ref()
            .is_some_and(|d| d.did == "alpine")
    }

    fn query(&self) -> Vec<MatchConstraint> {
        vec![MatchConstraint::DistributionVersionID]
    }

    fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool> {
        Ok(default_vulnerable(record, vuln, |a, b| {
            Some(version::compare(a, b))
        }))
    }
}
