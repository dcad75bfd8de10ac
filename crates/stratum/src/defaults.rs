//! Default scanner, matcher, and updater wiring

use std::sync::Arc;

use stratum_indexer::ScannerRegistry;
use stratum_matcher::{Enricher, Matcher};
use stratum_updater::UpdaterFactory;

/// Every scanner the engine ships
pub fn registry() -> ScannerRegistry {
    let mut registry = ScannerRegistry::new();
    registry
        .register_package(Arc::new(stratum_alpine::ApkPackageScanner))
        .register_package(Arc::new(stratum_debian::DpkgPackageScanner))
        .register_package(Arc::new(stratum_redhat::RpmPackageScanner))
        .register_package(Arc::new(stratum_python::PythonPackageScanner))
        .register_package(Arc::new(stratum_java::JavaPackageScanner))
        .register_distribution(Arc::new(stratum_alpine::DistScanner))
        .register_distribution(Arc::new(stratum_debian::DebianDistScanner))
        .register_distribution(Arc::new(stratum_debian::UbuntuDistScanner))
        .register_distribution(Arc::new(stratum_redhat::RedhatDistScanner))
        .register_repository(Arc::new(stratum_alpine::ApkRepoScanner))
        .register_repository(Arc::new(stratum_python::PythonRepoScanner))
        .register_repository(Arc::new(stratum_java::JavaRepoScanner));
    registry
}

/// Every matcher the engine ships, optionally narrowed by name
pub fn matchers(names: &[String]) -> Vec<Arc<dyn Matcher>> {
    let all: Vec<Arc<dyn Matcher>> = vec![
        Arc::new(stratum_alpine::AlpineMatcher),
        Arc::new(stratum_debian::DebianMatcher),
        Arc::new(stratum_debian::UbuntuMatcher),
        Arc::new(stratum_redhat::RedhatMatcher),
        Arc::new(stratum_python::PythonMatcher),
        Arc::new(stratum_java::JavaMatcher),
    ];
    if names.is_empty() {
        return all;
    }
    all.into_iter()
        .filter(|m| names.iter().any(|n| n == m.name()))
        .collect()
}

/// The enricher chain
pub fn enrichers() -> Vec<Arc<dyn Enricher>> {
    vec![Arc::new(stratum_cvss::CvssEnricher)]
}

/// Every updater factory the engine ships, optionally narrowed by name
pub fn factories(sets: &[String]) -> Vec<Box<dyn UpdaterFactory>> {
    let all: Vec<Box<dyn UpdaterFactory>> = vec![
        Box::new(stratum_alpine::AlpineFactory::new()),
        Box::new(stratum_debian::DebianFactory::new()),
        Box::new(stratum_debian::UbuntuFactory::new()),
        Box::new(stratum_redhat::RedhatFactory::new()),
        Box::new(stratum_osv::OsvFactory::new()),
        Box::new(stratum_cvss::CvssFactory::new()),
    ];
    if sets.is_empty() {
        return all;
    }
    all.into_iter()
        .filter(|f| sets.iter().any(|n| n == f.name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_fully_populated() {
        let r = registry();
        assert_eq!(r.package_scanners().len(), 5);
        assert_eq!(r.distribution_scanners().len(), 4);
        assert_eq!(r.repository_scanners().len(), 3);
    }

    #[test]
    fn test_matcher_narrowing() {
        assert_eq!(matchers(&[]).len(), 6);
        let narrowed = matchers(&["alpine-matcher".to_string()]);
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].name(), "alpine-matcher");
    }

    #[test]
    fn test_factory_narrowing() {
        assert_eq!(factories(&[]).len(), 6);
        let narrowed = factories(&["osv".to_string(), "cvss".to_string()]);
        let names: Vec<_> = narrowed.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["osv", "cvss"]);
    }
}
