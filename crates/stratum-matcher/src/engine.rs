//! The matching engine

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use stratum_core::{CancelToken, IndexRecord, IndexReport, Vulnerability, VulnerabilityReport};
use stratum_store::Store;

use crate::{Enricher, EnrichmentGetter, Matcher, RemoteMatcher};

/// Default bound for one remote-matcher request
const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fans an index report across matchers and assembles the final report
pub struct MatchingEngine {
    matchers: Vec<Arc<dyn Matcher>>,
    remote_matchers: Vec<Arc<dyn RemoteMatcher>>,
    enrichers: Vec<Arc<dyn Enricher>>,
    remote_timeout: Duration,
}

impl MatchingEngine {
    pub fn new(
        matchers: Vec<Arc<dyn Matcher>>,
        remote_matchers: Vec<Arc<dyn RemoteMatcher>>,
        enrichers: Vec<Arc<dyn Enricher>>,
    ) -> Self {
        Self {
            matchers,
            remote_matchers,
            enrichers,
            remote_timeout: REMOTE_TIMEOUT,
        }
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Match one inventory against the live snapshot
    ///
    /// Matcher and enricher failures degrade: the report carries whatever
    /// succeeded plus an error annotation per failure.
    pub fn match_report(
        &self,
        cancel: &CancelToken,
        store: &Store,
        index: &IndexReport,
    ) -> Result<VulnerabilityReport> {
        let records = index.index_records();
        let mut report = VulnerabilityReport {
            manifest_hash: Some(index.manifest_hash.clone()),
            packages: index.packages.clone(),
            distributions: index.distributions.clone(),
            repositories: index.repositories.clone(),
            environments: index.environments.clone(),
            ..Default::default()
        };

        for matcher in &self.matchers {
            cancel.checkpoint()?;
            let claimed: Vec<IndexRecord> = records
                .iter()
                .filter(|r| matcher.filter(r))
                .cloned()
                .collect();
            if claimed.is_empty() {
                continue;
            }
            debug!(matcher = matcher.name(), records = claimed.len(), "matcher pass");

            let candidates = match store.get(&claimed, &matcher.query()) {
                Ok(c) => c,
                Err(e) => {
                    warn!(matcher = matcher.name(), error = %e, "store lookup failed");
                    report
                        .errors
                        .push(format!("matcher {}: {}", matcher.name(), e));
                    continue;
                }
            };
            if candidates.is_empty() {
                continue;
            }

            // evaluate (record, candidate) pairs in parallel
            let hits: Vec<(String, Vulnerability)> = claimed
                .par_iter()
                .flat_map_iter(|record| {
                    let cands = candidates
                        .get(&record.package.id)
                        .map(|v| v.as_slice())
                        .unwrap_or(&[]);
                    cands
                        .iter()
                        .filter(|vuln| match matcher.vulnerable(record, vuln) {
                            Ok(decision) => decision,
                            Err(e) => {
                                let error = format!("{:#}", e);
                                warn!(
                                    matcher = matcher.name(),
                                    vuln = %vuln.name,
                                    error = %error,
                                    "vulnerable() failed"
                                );
                                false
                            }
                        })
                        .map(|vuln| (record.package.id.clone(), vuln.clone()))
                        .collect::<Vec<_>>()
                })
                .collect();
            collate(&mut report, hits);
        }

        for rm in &self.remote_matchers {
            cancel.checkpoint()?;
            let claimed: Vec<IndexRecord> = records.to_vec();
            match self.query_remote_bounded(cancel, rm, claimed) {
                Ok(map) => {
                    let hits = map
                        .into_iter()
                        .flat_map(|(pkg, vulns)| {
                            vulns.into_iter().map(move |v| (pkg.clone(), v))
                        })
                        .collect();
                    collate(&mut report, hits);
                }
                Err(e) => {
                    // remote matchers never fail the report
                    let error = format!("{:#}", e);
                    warn!(matcher = rm.name(), error = %error, "remote matcher degraded");
                    report.errors.push(format!("matcher {}: {}", rm.name(), error));
                }
            }
        }

        for enricher in &self.enrichers {
            cancel.checkpoint()?;
            let getter = StoreGetter {
                store,
                updater: enricher.name(),
            };
            match enricher.enrich(&getter, &report) {
                Ok(blobs) if !blobs.is_empty() => {
                    report
                        .enrichments
                        .insert(enricher.name().to_string(), blobs);
                }
                Ok(_) => {}
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(enricher = enricher.name(), error = %error, "enricher degraded");
                    report
                        .errors
                        .push(format!("enricher {}: {}", enricher.name(), error));
                }
            }
        }

        info!(
            packages = report.packages.len(),
            vulnerabilities = report.vulnerabilities.len(),
            "vulnerability report assembled"
        );
        Ok(report)
    }

    /// Run one remote matcher on its own thread so a hung service cannot
    /// stall the report past the timeout
    fn query_remote_bounded(
        &self,
        cancel: &CancelToken,
        rm: &Arc<dyn RemoteMatcher>,
        records: Vec<IndexRecord>,
    ) -> Result<std::collections::HashMap<String, Vec<Vulnerability>>> {
        let (tx, rx) = mpsc::channel();
        let rm = rm.clone();
        let cancel = cancel.clone();
        let timeout = self.remote_timeout;
        std::thread::spawn(move || {
            let _ = tx.send(rm.query_remote(&cancel, &records, timeout));
        });
        match rx.recv_timeout(timeout + Duration::from_millis(250)) {
            Ok(result) => result,
            Err(_) => anyhow::bail!("timed out after {:?}", self.remote_timeout),
        }
    }
}

/// Binds an enricher name to the store's enrichment lookup
struct StoreGetter<'a> {
    store: &'a Store,
    updater: &'static str,
}

impl EnrichmentGetter for StoreGetter<'_> {
    fn get(&self, tags: &[String]) -> Result<Vec<serde_json::Value>> {
        Ok(self.store.get_enrichment(self.updater, tags)?)
    }
}

/// Fold matcher hits into the report, deduplicating per package
fn collate(report: &mut VulnerabilityReport, hits: Vec<(String, Vulnerability)>) {
    for (pkg_id, mut vuln) in hits {
        if vuln.id.is_empty() {
            // remote results carry no store id; key them by content
            vuln.id = format!("x{}", &vuln.content_hash()[..16]);
        }
        let vuln_id = vuln.id.clone();
        report.vulnerabilities.entry(vuln_id.clone()).or_insert(vuln);
        let list = report.package_vulnerabilities.entry(pkg_id).or_default();
        if !list.contains(&vuln_id) {
            list.push(vuln_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use std::collections::HashMap;

    use stratum_core::{
        Digest, Distribution, Environment, Fingerprint, IndexState, MatchConstraint, Package,
        Severity,
    };

    use crate::default_vulnerable;

    fn digest() -> Digest {
        format!("sha256:{}", "11".repeat(32)).parse().unwrap()
    }

    fn index_report() -> IndexReport {
        let mut report = IndexReport::new(digest());
        report.state = IndexState::IndexFinished;
        report.success = true;
        report.packages.insert(
            "1".to_string(),
            Package {
                id: "1".to_string(),
                name: "botan".to_string(),
                version: "2.5.0-r0".to_string(),
                arch: "x86_64".to_string(),
                package_db: "lib/apk/db/installed".to_string(),
                ..Default::default()
            },
        );
        report.distributions.insert(
            "1".to_string(),
            Distribution {
                did: "alpine".to_string(),
                name: "Alpine Linux".to_string(),
                version: "3.10".to_string(),
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
        report
    }

    fn seed_vuln(store: &Store, fixed_in: &str) {
        store
            .update_vulnerabilities(
                "alpine",
                &Fingerprint::new("f"),
                &[stratum_core::Vulnerability {
                    updater: "alpine".to_string(),
                    name: "CVE-2018-20187".to_string(),
                    severity: "Medium".to_string(),
                    normalized_severity: Severity::Medium,
                    package: Some(Package {
                        name: "botan".to_string(),
                        ..Default::default()
                    }),
                    dist: Some(Distribution {
                        did: "alpine".to_string(),
                        version_id: "3.10".to_string(),
                        ..Default::default()
                    }),
                    fixed_in_version: fixed_in.to_string(),
                    ..Default::default()
                }],
            )
            .unwrap();
    }

    struct StubApkMatcher;

    impl Matcher for StubApkMatcher {
        fn name(&self) -> &'static str {
            "stub-apk"
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
            // test ordering: numeric-ish lexicographic is fine for these
            Ok(default_vulnerable(record, vuln, |a, b| {
                Some(a.cmp(b))
            }))
        }
    }

    struct FailingRemote;

    impl RemoteMatcher for FailingRemote {
        fn name(&self) -> &'static str {
            "failing-remote"
        }
        fn query_remote(
            &self,
            _cancel: &CancelToken,
            _records: &[IndexRecord],
            _timeout: Duration,
        ) -> Result<HashMap<String, Vec<Vulnerability>>> {
            anyhow::bail!("service unavailable")
        }
    }

    struct SlowRemote;

    impl RemoteMatcher for SlowRemote {
        fn name(&self) -> &'static str {
            "slow-remote"
        }
        fn query_remote(
            &self,
            _cancel: &CancelToken,
            _records: &[IndexRecord],
            _timeout: Duration,
        ) -> Result<HashMap<String, Vec<Vulnerability>>> {
            std::thread::sleep(Duration::from_secs(5));
            Ok(HashMap::new())
        }
    }

    struct StaticEnricher;

    impl Enricher for StaticEnricher {
        fn name(&self) -> &'static str {
            "cvss"
        }
        fn enrich(
            &self,
            getter: &dyn EnrichmentGetter,
            report: &VulnerabilityReport,
        ) -> Result<Vec<serde_json::Value>> {
            let tags: Vec<String> =
                report.vulnerabilities.values().map(|v| v.name.clone()).collect();
            getter.get(&tags)
        }
    }

    #[test]
    fn test_end_to_end_match() {
        let store = Store::open_in_memory().unwrap();
        seed_vuln(&store, "2.9.0-r0");
        let engine = MatchingEngine::new(vec![Arc::new(StubApkMatcher)], vec![], vec![]);

        let report = engine
            .match_report(&CancelToken::new(), &store, &index_report())
            .unwrap();
        assert_eq!(report.vulnerabilities.len(), 1);
        assert_eq!(report.package_vulnerabilities["1"].len(), 1);
        let v = report.vulnerabilities.values().next().unwrap();
        assert_eq!(v.name, "CVE-2018-20187");
    }

    #[test]
    fn test_sentinel_yields_no_findings() {
        let store = Store::open_in_memory().unwrap();
        seed_vuln(&store, "0");
        let engine = MatchingEngine::new(vec![Arc::new(StubApkMatcher)], vec![], vec![]);
        let report = engine
            .match_report(&CancelToken::new(), &store, &index_report())
            .unwrap();
        assert!(report.vulnerabilities.is_empty());
        assert!(report.package_vulnerabilities.is_empty());
    }

    #[test]
    fn test_unfixed_vuln_always_matches() {
        let store = Store::open_in_memory().unwrap();
        seed_vuln(&store, "");
        let engine = MatchingEngine::new(vec![Arc::new(StubApkMatcher)], vec![], vec![]);
        let report = engine
            .match_report(&CancelToken::new(), &store, &index_report())
            .unwrap();
        assert_eq!(report.vulnerabilities.len(), 1);
    }

    #[test]
    fn test_remote_matcher_failure_degrades() {
        let store = Store::open_in_memory().unwrap();
        seed_vuln(&store, "2.9.0-r0");
        let engine = MatchingEngine::new(
            vec![Arc::new(StubApkMatcher)],
            vec![Arc::new(FailingRemote)],
            vec![],
        );
        let report = engine
            .match_report(&CancelToken::new(), &store, &index_report())
            .unwrap();
        // local findings survive, the failure is annotated
        assert_eq!(report.vulnerabilities.len(), 1);
        assert!(report.errors.iter().any(|e| e.contains("failing-remote")));
    }

    #[test]
    fn test_remote_matcher_timeout_degrades() {
        let store = Store::open_in_memory().unwrap();
        let engine = MatchingEngine::new(vec![], vec![Arc::new(SlowRemote)], vec![])
            .with_remote_timeout(Duration::from_millis(50));
        let report = engine
            .match_report(&CancelToken::new(), &store, &index_report())
            .unwrap();
        assert!(report.errors.iter().any(|e| e.contains("slow-remote")));
    }

    #[test]
    fn test_enricher_attaches_blobs() {
        let store = Store::open_in_memory().unwrap();
        seed_vuln(&store, "2.9.0-r0");
        store
            .update_enrichments(
                "cvss",
                &Fingerprint::new("f"),
                &[stratum_core::EnrichmentRecord {
                    tags: vec!["CVE-2018-20187".to_string()],
                    enrichment: serde_json::json!({"baseScore": 6.5}),
                }],
            )
            .unwrap();
        let engine = MatchingEngine::new(
            vec![Arc::new(StubApkMatcher)],
            vec![],
            vec![Arc::new(StaticEnricher)],
        );
        let report = engine
            .match_report(&CancelToken::new(), &store, &index_report())
            .unwrap();
        let blobs = &report.enrichments["cvss"];
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0]["baseScore"], 6.5);
    }
}
