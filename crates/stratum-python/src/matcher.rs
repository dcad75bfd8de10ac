//! PyPI matcher

use anyhow::Result;

use stratum_core::{IndexRecord, MatchConstraint, Vulnerability};
use stratum_matcher::{default_vulnerable, Matcher};

use crate::{pep440, PYPI_REPOSITORY};

/// Matches installed Python distributions against PyPI advisories
#[derive(Debug, Default)]
pub struct PythonMatcher;

impl Matcher for PythonMatcher {
    fn name(&self) -> &'static str {
        "python-matcher"
    }

    fn filter(&self, record: &IndexRecord) -> bool {
        record
            .repository
            .as_ref()
            .is_some_and(|r| r.name == PYPI_REPOSITORY)
    }

    fn query(&self) -> Vec<MatchConstraint> {
        vec![MatchConstraint::RepositoryName]
    }

    fn vulnerable(&self, record: &IndexRecord, vuln: &Vulnerability) -> Result<bool> {
        Ok(default_vulnerable(record, vuln, pep440::compare))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{Package, Repository};

    fn record(name: &str, version: &str) -> IndexRecord {
        IndexRecord {
            package: Package {
                name: name.to_string(),
                version: version.to_string(),
                package_db: "usr/lib/python3.7/site-packages".to_string(),
                ..Default::default()
            },
            distribution: None,
            repository: Some(Repository {
                name: PYPI_REPOSITORY.to_string(),
                ..Default::default()
            }),
        }
    }

    fn vuln(fixed_in: &str) -> Vulnerability {
        Vulnerability {
            updater: "osv-pypi-updater".to_string(),
            name: "PYSEC-2018-28".to_string(),
            package: Some(Package {
                name: "requests".to_string(),
                ..Default::default()
            }),
            fixed_in_version: fixed_in.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_requires_pypi_repository() {
        assert!(PythonMatcher.filter(&record("requests", "2.19.1")));
        let mut other = record("requests", "2.19.1");
        other.repository = None;
        assert!(!PythonMatcher.filter(&other));
    }

    #[test]
    fn test_pep440_decides() {
        let m = PythonMatcher;
        assert!(m.vulnerable(&record("requests", "2.19.1"), &vuln("2.20.0")).unwrap());
        assert!(!m.vulnerable(&record("requests", "2.20.0"), &vuln("2.20.0")).unwrap());
        // pre-release of the fix is still affected
        assert!(m.vulnerable(&record("requests", "2.20.0rc1"), &vuln("2.20.0")).unwrap());
    }

    #[test]
    fn test_unparseable_version_does_not_match() {
        let m = PythonMatcher;
        assert!(!m.vulnerable(&record("requests", "2.19.1-weird-fork"), &vuln("2.20.0")).unwrap());
    }
}
