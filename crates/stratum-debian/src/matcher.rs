//! Debian and Ubuntu matchers

use anyhow::Result;

use stratum_core::{IndexRecord, MatchConstraint, Vulnerability};
use stratum_matcher::{default_vulnerable, Matcher};

use crate::version;

/// Matches dpkg packages against tracker-sourced vulnerabilities
#[derive(Debug, Default)]
pub struct DebianMatcher;

impl Matcher for DebianMatcher {
    fn name(&self) -> &'static str {
        "debian-matcher"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .distribution
            .as_ref()
            .is_some_and(|d| d.did == "debian")
    }

    fn query(&self) -> Vec<MatchConstraint> {
        vec![MatchConstraint::DistributionVersionCodeName]
    }

    fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool> {
        Ok(default_vulnerable(record, vuln, |a, b| {
            Some(version::compare(a, b))
        }))
    }
}

/// Matches dpkg packages against OVAL-sourced vulnerabilities
#[derive(Debug, Default)]
pub struct UbuntuMatcher;

impl Matcher for UbuntuMatcher {
    fn name(&self) -> &'static str {
        "ubuntu-matcher"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .distribution
            .as_ref()
            .is_some_and(|d| d.did == "ubuntu")
    }

    fn query(&self) -> Vec<MatchConstraint> {
        vec![MatchConstraint::DistributionVersionCodeName]
    }

    fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool> {
        Ok(default_vulnerable(record, vuln, |a, b| {
            Some(version::compare(a, b))
        }))
    }
}
