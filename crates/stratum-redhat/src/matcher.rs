//! Red Hat family matcher

use anyhow::Result;

use stratum_core::{IndexRecord, MatchConstraint, Vulnerability};
use stratum_matcher::{default_vulnerable, Matcher};

use crate::version;

/// Matches rpm packages against Security Data API vulnerabilities
#[derive(Debug, Default)]
pub struct RedhatMatcher;

impl Matcher for RedhatMatcher {
    fn name(&self) -> &'static str {
        "rhel-matcher"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .distribution
            .as_ref()
            .is_some_and(|d| d.did == "rhel")
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

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{Distribution, Package};

    fn record(version: &str) -> IndexRecord {
        IndexRecord {
            package: Package {
                name: "openssl".to_string(),
                version: version.to_string(),
                arch: "x86_64".to_string(),
                package_db: "var/lib/rpm/rpmdb.sqlite".to_string(),
                ..Default::default()
            },
            distribution: Some(Distribution {
                did: "rhel".to_string(),
                version_id: "7".to_string(),
                ..Default::default()
            }),
            repository: None,
        }
    }

    fn vuln(fixed_in: &str) -> Vulnerability {
        Vulnerability {
            updater: "rhel-secdata-updater".to_string(),
            name: "CVE-2017-3736".to_string(),
            package: Some(Package {
                name: "openssl".to_string(),
                ..Default::default()
            }),
            fixed_in_version: fixed_in.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter() {
        assert!(RedhatMatcher.filter(&record("1.0.2k-8.el7")));
        let mut other = record("1.0.2k-8.el7");
        other.distribution.as_mut().unwrap().did = "alpine".to_string();
        assert!(!RedhatMatcher.filter(&other));
    }

    #[test]
    fn test_evr_ordering_decides() {
        let m = RedhatMatcher;
        assert!(m
            .vulnerable(&record("1.0.2k-8.el7"), &vuln("1.0.2k-16.el7"))
            .unwrap());
        assert!(!m
            .vulnerable(&record("1.0.2k-16.el7"), &vuln("1.0.2k-16.el7"))
            .unwrap());
        // epoch on the installed side dominates
        assert!(!m
            .vulnerable(&record("2:1.0.1e-1.el7"), &vuln("1.0.2k-16.el7"))
            .unwrap());
    }

    #[test]
    fn test_sentinel_and_unfixed() {
        let m = RedhatMatcher;
        assert!(m.vulnerable(&record("1.0.2k-8.el7"), &vuln("")).unwrap());
        assert!(!m.vulnerable(&record("1.0.2k-8.el7"), &vuln("0")).unwrap());
    }
}
