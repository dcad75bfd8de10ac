//! Maven matcher

use anyhow::Result;

use stratum_core::{IndexRecord, MatchConstraint, Vulnerability};
use stratum_matcher::{default_vulnerable, Matcher};

use crate::{maven, MAVEN_REPOSITORY};

/// Matches identified Java archives against Maven advisories
#[derive(Debug, Default)]
pub struct JavaMatcher;

impl Matcher for JavaMatcher {
    fn name(&self) -> &'static str {
        "java-matcher"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .repository
            .as_ref()
            .is_some_and(|r| r.name == MAVEN_REPOSITORY)
    }

    fn query(&self) -> Vec<MatchConstraint> {
        vec![MatchConstraint::RepositoryName]
    }

    fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool> {
        Ok(default_vulnerable(record, vuln, |a, b| {
            Some(maven::compare(a, b))
        }))
    }
}
