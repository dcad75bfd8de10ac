//! The update manager
//!
//! One `run` is a pass: materialize every factory's updaters, execute
//! them on a bounded worker pool with a cluster-wide advisory lock per
//! updater name, record per-updater status, then trim retention. `start`
//! loops with a jittered interval until cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use stratum_core::{CancelToken, UpdateKind};
use stratum_store::{LockSource, Store};

use crate::{FetchError, Updater, UpdaterConfigs, UpdaterFactory};

/// Knobs for the manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Parallelism bound for one pass
    pub batch_size: usize,
    /// Scheduler interval for [`UpdateManager::start`]
    pub period: Duration,
    /// Operations retained per updater; GC runs only when at least 2, so
    /// diffs stay computable
    pub retention: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            period: Duration::from_secs(30 * 60),
            retention: 2,
        }
    }
}

enum Outcome {
    Updated(usize),
    Unchanged,
}

/// Schedules and executes updater passes
pub struct UpdateManager {
    store: Arc<Store>,
    locks: Arc<dyn LockSource>,
    factories: Vec<Box<dyn UpdaterFactory>>,
    config: ManagerConfig,
}

impl UpdateManager {
    pub fn new(store: Arc<Store>, locks: Arc<dyn LockSource>, config: ManagerConfig) -> Self {
        Self {
            store,
            locks,
            factories: Vec::new(),
            config,
        }
    }

    pub fn add_factory(&mut self, factory: Box<dyn UpdaterFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    /// Hand every factory its config blob and the shared HTTP client
    pub fn configure(&mut self, cfg: &UpdaterConfigs, client: &ureq::Agent) -> Result<()> {
        for f in &mut self.factories {
            f.configure(cfg, client)
                .with_context(|| format!("failed to configure factory {}", f.name()))?;
        }
        Ok(())
    }

    /// One full pass over every factory's updaters
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        let mut updaters: Vec<Arc<dyn Updater>> = Vec::new();
        for f in &self.factories {
            cancel.checkpoint()?;
            match f.updaters(cancel) {
                Ok(set) => updaters.extend(set),
                // a broken factory costs its own feeds, not the pass
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(factory = f.name(), error = %error, "factory failed");
                }
            }
        }
        info!(updaters = updaters.len(), "update pass starting");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.batch_size.max(1))
            .build()
            .context("failed to build update worker pool")?;
        pool.install(|| {
            updaters.par_iter().for_each(|u| {
                if cancel.is_cancelled() {
                    return;
                }
                self.drive(cancel, u.as_ref());
            });
        });
        cancel.checkpoint()?;

        if self.config.retention >= 2 {
            let deleted = self.store.gc_full(self.config.retention)?;
            if deleted > 0 {
                info!(deleted, retention = self.config.retention, "retention GC");
            }
        }
        Ok(())
    }

    /// Loop `run` with a jittered interval until cancelled
    pub fn start(&self, cancel: &CancelToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if let Err(e) = self.run(cancel) {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let error = format!("{:#}", e);
                warn!(error = %error, "update pass failed");
            }
            let deadline = Instant::now() + jitter(self.config.period);
            while Instant::now() < deadline {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(Duration::from_millis(250).min(remaining));
            }
        }
    }

    /// Execute one updater under its cluster-wide lock
    fn drive(&self, cancel: &CancelToken, updater: &dyn Updater) {
        let name = updater.name();
        let Some(_guard) = self.locks.try_lock(&name) else {
            debug!(updater = %name, "skipped; another holder owns the lock");
            return;
        };
        match self.pass(cancel, updater, &name) {
            Ok(Outcome::Updated(count)) => info!(updater = %name, records = count, "updated"),
            Ok(Outcome::Unchanged) => debug!(updater = %name, "unchanged"),
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(updater = %name, error = %message, "updater failed");
                if let Err(e) = self.store.record_attempt(&name, &message) {
                    let error = format!("{:#}", e);
                    warn!(updater = %name, error = %error, "failed to record attempt");
                }
            }
        }
    }

    fn pass(&self, cancel: &CancelToken, updater: &dyn Updater, name: &str) -> Result<Outcome> {
        cancel.checkpoint()?;
        let prev = self.store.get_fingerprint(name)?;
        let (rdr, fingerprint) = match updater.fetch(cancel, prev.as_ref()) {
            Ok(fetched) => fetched,
            Err(FetchError::Unchanged) => {
                // success without a new operation; the stored fingerprint
                // is left untouched
                self.store.record_success(name, None)?;
                return Ok(Outcome::Unchanged);
            }
            Err(FetchError::Cancelled(c)) => return Err(c.into()),
            Err(FetchError::Other(e)) => return Err(e.context("fetch failed")),
        };
        cancel.checkpoint()?;

        let count = match updater.kind() {
            UpdateKind::Vulnerability => {
                let vulns = updater.parse(cancel, rdr).context("parse failed")?;
                self.store
                    .update_vulnerabilities(name, &fingerprint, &vulns)?;
                vulns.len()
            }
            UpdateKind::Enrichment => {
                let records = updater
                    .parse_enrichments(cancel, rdr)
                    .context("parse failed")?;
                self.store.update_enrichments(name, &fingerprint, &records)?;
                records.len()
            }
        };
        self.store.record_success(name, Some(&fingerprint))?;
        Ok(Outcome::Updated(count))
    }
}

fn jitter(period: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..1.25);
    period.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stratum_core::{Fingerprint, Package, Severity, Vulnerability};
    use stratum_store::ProcessLocks;

    struct StubUpdater {
        name: String,
        fetches: AtomicUsize,
        parses: AtomicUsize,
        fingerprint: String,
        vulns: Vec<Vulnerability>,
        fail_fetch: bool,
    }

    impl StubUpdater {
        fn new(name: &str, fingerprint: &str, vulns: Vec<Vulnerability>) -> Self {
            Self {
                name: name.to_string(),
                fetches: AtomicUsize::new(0),
                parses: AtomicUsize::new(0),
                fingerprint: fingerprint.to_string(),
                vulns,
                fail_fetch: false,
            }
        }
    }

    impl Updater for StubUpdater {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn fetch(
            &self,
            _cancel: &CancelToken,
            prev: Option<&Fingerprint>,
        ) -> std::result::Result<(Box<dyn Read + Send>, Fingerprint), FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(FetchError::Other(anyhow::anyhow!("connection refused")));
            }
            if prev.map(|f| f.as_str()) == Some(self.fingerprint.as_str()) {
                return Err(FetchError::Unchanged);
            }
            Ok((
                Box::new(Cursor::new(Vec::new())),
                Fingerprint::new(self.fingerprint.clone()),
            ))
        }

        fn parse(
            &self,
            _cancel: &CancelToken,
            _rdr: Box<dyn Read + Send>,
        ) -> Result<Vec<Vulnerability>> {
            self.parses.fetch_add(1, Ordering::SeqCst);
            Ok(self.vulns.clone())
        }
    }

    struct StubFactory {
        updaters: Vec<Arc<dyn Updater>>,
    }

    impl UpdaterFactory for StubFactory {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn updaters(&self, _cancel: &CancelToken) -> Result<Vec<Arc<dyn Updater>>> {
            Ok(self.updaters.clone())
        }
    }

    fn vuln(name: &str) -> Vulnerability {
        Vulnerability {
            updater: "stub".to_string(),
            name: name.to_string(),
            normalized_severity: Severity::Low,
            package: Some(Package {
                name: "pkg".to_string(),
                ..Default::default()
            }),
            fixed_in_version: "1.0".to_string(),
            ..Default::default()
        }
    }

    fn manager_with(updaters: Vec<Arc<dyn Updater>>) -> (UpdateManager, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut mgr = UpdateManager::new(
            store.clone(),
            Arc::new(ProcessLocks::new()),
            ManagerConfig {
                batch_size: 2,
                ..Default::default()
            },
        );
        mgr.add_factory(Box::new(StubFactory { updaters }));
        (mgr, store)
    }

    #[test]
    fn test_pass_records_operation_and_status() {
        let upd = Arc::new(StubUpdater::new("feed-a", "etag:1", vec![vuln("CVE-1")]));
        let (mgr, store) = manager_with(vec![upd.clone()]);

        mgr.run(&CancelToken::new()).unwrap();
        let latest = store
            .latest_update_operations(UpdateKind::Vulnerability)
            .unwrap();
        assert!(latest.contains_key("feed-a"));
        let status = store.updater_status("feed-a").unwrap().unwrap();
        assert!(status.last_run_succeeded);
        assert_eq!(
            status.fingerprint,
            Some(Fingerprint::new("etag:1"))
        );
        assert_eq!(upd.parses.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unchanged_pass_skips_parse_and_store() {
        let upd = Arc::new(StubUpdater::new("feed-a", "etag:1", vec![vuln("CVE-1")]));
        let (mgr, store) = manager_with(vec![upd.clone()]);
        let cancel = CancelToken::new();

        mgr.run(&cancel).unwrap();
        let first = store.updater_status("feed-a").unwrap().unwrap();

        // second pass: the stub sees its own fingerprint and reports 304
        mgr.run(&cancel).unwrap();
        let second = store.updater_status("feed-a").unwrap().unwrap();

        assert_eq!(upd.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(upd.parses.load(Ordering::SeqCst), 1);
        let ops = store.get_update_operations(UpdateKind::Vulnerability).unwrap();
        assert_eq!(ops["feed-a"].len(), 1);
        assert!(second.last_success >= first.last_success);
        assert_eq!(second.fingerprint, first.fingerprint);
    }

    #[test]
    fn test_failed_updater_does_not_abort_pass() {
        let mut bad = StubUpdater::new("feed-bad", "etag:1", vec![]);
        bad.fail_fetch = true;
        let good = Arc::new(StubUpdater::new("feed-good", "etag:2", vec![vuln("CVE-2")]));
        let (mgr, store) = manager_with(vec![Arc::new(bad), good]);

        mgr.run(&CancelToken::new()).unwrap();

        let bad_status = store.updater_status("feed-bad").unwrap().unwrap();
        assert!(!bad_status.last_run_succeeded);
        assert!(bad_status.last_error.as_deref().unwrap().contains("connection refused"));

        let good_status = store.updater_status("feed-good").unwrap().unwrap();
        assert!(good_status.last_run_succeeded);
    }

    #[test]
    fn test_lock_held_elsewhere_skips_updater() {
        let upd = Arc::new(StubUpdater::new("feed-a", "etag:1", vec![]));
        let store = Arc::new(Store::open_in_memory().unwrap());
        let locks = Arc::new(ProcessLocks::new());
        let mut mgr = UpdateManager::new(store.clone(), locks.clone(), ManagerConfig::default());
        mgr.add_factory(Box::new(StubFactory {
            updaters: vec![upd.clone()],
        }));

        let _held = locks.try_lock("feed-a").unwrap();
        mgr.run(&CancelToken::new()).unwrap();
        assert_eq!(upd.fetches.load(Ordering::SeqCst), 0);
        assert!(store.updater_status("feed-a").unwrap().is_none());
    }

    #[test]
    fn test_retention_gc_runs_after_pass() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut mgr = UpdateManager::new(
            store.clone(),
            Arc::new(ProcessLocks::new()),
            ManagerConfig {
                retention: 2,
                ..Default::default()
            },
        );
        // three passes with distinct fingerprints force three operations
        for n in 0..3 {
            let upd = Arc::new(StubUpdater::new(
                "feed-a",
                &format!("etag:{}", n),
                vec![vuln(&format!("CVE-{}", n))],
            ));
            let mut fresh = UpdateManager::new(
                store.clone(),
                Arc::new(ProcessLocks::new()),
                ManagerConfig {
                    retention: 2,
                    ..Default::default()
                },
            );
            fresh.add_factory(Box::new(StubFactory {
                updaters: vec![upd],
            }));
            fresh.run(&CancelToken::new()).unwrap();
        }
        mgr.run(&CancelToken::new()).unwrap();

        let ops = store.get_update_operations(UpdateKind::Vulnerability).unwrap();
        assert_eq!(ops["feed-a"].len(), 2);
    }

    #[test]
    fn test_cancelled_run_stops_early() {
        let upd = Arc::new(StubUpdater::new("feed-a", "etag:1", vec![]));
        let (mgr, _store) = manager_with(vec![upd.clone()]);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(mgr.run(&cancel).is_err());
        assert_eq!(upd.fetches.load(Ordering::SeqCst), 0);
    }
}
