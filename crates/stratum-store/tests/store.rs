//! Store behavior tests: snapshots, diffs, GC, status bookkeeping

use stratum_core::{
    Distribution, EnrichmentRecord, Fingerprint, IndexRecord, MatchConstraint, Package,
    Severity, UpdateKind, Vulnerability,
};
use stratum_store::Store;

fn vuln(updater: &str, name: &str, pkg: &str, fixed_in: &str) -> Vulnerability {
    Vulnerability {
        updater: updater.to_string(),
        name: name.to_string(),
        severity: "High".to_string(),
        normalized_severity: Severity::High,
        package: Some(Package {
            name: pkg.to_string(),
            ..Default::default()
        }),
        dist: Some(Distribution {
            did: "alpine".to_string(),
            version_id: "3.10".to_string(),
            ..Default::default()
        }),
        fixed_in_version: fixed_in.to_string(),
        ..Default::default()
    }
}

fn record(pkg_id: &str, pkg: &str, version: &str) -> IndexRecord {
    IndexRecord {
        package: Package {
            id: pkg_id.to_string(),
            name: pkg.to_string(),
            version: version.to_string(),
            ..Default::default()
        },
        distribution: Some(Distribution {
            did: "alpine".to_string(),
            version_id: "3.10".to_string(),
            ..Default::default()
        }),
        repository: None,
    }
}

#[test]
fn test_latest_snapshot_per_updater() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("etag:1");
    let r1 = store
        .update_vulnerabilities("alpine", &fp, &[vuln("alpine", "CVE-1", "a", "1.0")])
        .unwrap();
    let r2 = store
        .update_vulnerabilities("alpine", &fp, &[vuln("alpine", "CVE-2", "b", "1.0")])
        .unwrap();
    let r3 = store
        .update_vulnerabilities("debian", &fp, &[vuln("debian", "CVE-3", "c", "1.0")])
        .unwrap();

    let latest = store
        .latest_update_operations(UpdateKind::Vulnerability)
        .unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest["alpine"].reference, r2);
    assert_eq!(latest["debian"].reference, r3);
    assert_ne!(r1, r2);

    let all = store.get_update_operations(UpdateKind::Vulnerability).unwrap();
    assert_eq!(all["alpine"].len(), 2);
    // newest first
    assert_eq!(all["alpine"][0].reference, r2);
}

#[test]
fn test_update_diff_identities() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("f");
    let a = store
        .update_vulnerabilities(
            "alpine",
            &fp,
            &[
                vuln("alpine", "CVE-1", "a", "1.0"),
                vuln("alpine", "CVE-2", "b", "1.0"),
            ],
        )
        .unwrap();

    // diff(a, a) is empty both ways
    let same = store.get_update_diff(Some(a), a).unwrap();
    assert!(same.added.is_empty());
    assert!(same.removed.is_empty());

    // diff(∅, a) adds everything, removes nothing
    let from_empty = store.get_update_diff(None, a).unwrap();
    assert_eq!(from_empty.added.len(), 2);
    assert!(from_empty.removed.is_empty());
    assert!(from_empty.prev.is_none());

    let b = store
        .update_vulnerabilities(
            "alpine",
            &fp,
            &[
                vuln("alpine", "CVE-2", "b", "1.0"),
                vuln("alpine", "CVE-3", "c", "1.0"),
            ],
        )
        .unwrap();
    let diff = store.get_update_diff(Some(a), b).unwrap();
    let added: Vec<_> = diff.added.iter().map(|v| v.name.as_str()).collect();
    let removed: Vec<_> = diff.removed.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(added, vec!["CVE-3"]);
    assert_eq!(removed, vec!["CVE-1"]);
}

#[test]
fn test_diff_unknown_ref_is_not_found() {
    let store = Store::open_in_memory().unwrap();
    let missing = uuid::Uuid::new_v4();
    let err = store.get_update_diff(None, missing).unwrap_err();
    assert!(matches!(err, stratum_store::StoreError::NotFound(r) if r == missing));
}

#[test]
fn test_gc_retention_two() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("f");
    // three operations with distinct vulns, plus one shared across all
    let shared = vuln("alpine", "CVE-SHARED", "s", "1.0");
    let o1 = store
        .update_vulnerabilities(
            "alpine",
            &fp,
            &[vuln("alpine", "CVE-1", "a", "1.0"), shared.clone()],
        )
        .unwrap();
    let o2 = store
        .update_vulnerabilities(
            "alpine",
            &fp,
            &[vuln("alpine", "CVE-2", "b", "1.0"), shared.clone()],
        )
        .unwrap();
    let o3 = store
        .update_vulnerabilities(
            "alpine",
            &fp,
            &[vuln("alpine", "CVE-3", "c", "1.0"), shared.clone()],
        )
        .unwrap();

    let deleted = store.gc_full(2).unwrap();
    assert_eq!(deleted, 1);

    let ops = store.get_update_operations(UpdateKind::Vulnerability).unwrap();
    let refs: Vec<_> = ops["alpine"].iter().map(|o| o.reference).collect();
    assert_eq!(refs, vec![o3, o2]);
    assert!(!refs.contains(&o1));

    // vulns referenced only by O1 are gone, the shared one survived
    let diff = store.get_update_diff(None, o2).unwrap();
    let names: Vec<_> = diff.added.iter().map(|v| v.name.as_str()).collect();
    assert!(names.contains(&"CVE-SHARED"));
    assert!(names.contains(&"CVE-2"));

    // idempotent: a second pass has nothing to do
    assert_eq!(store.gc_full(2).unwrap(), 0);
}

#[test]
fn test_delete_cascades_and_orphan_sweep() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("f");
    let only = store
        .update_vulnerabilities("osv-pypi", &fp, &[vuln("osv-pypi", "PYSEC-1", "x", "2.0")])
        .unwrap();
    assert_eq!(store.delete_update_operations(&[only]).unwrap(), 1);

    assert!(store
        .get_update_operations(UpdateKind::Vulnerability)
        .unwrap()
        .is_empty());
    // deleting again is a no-op
    assert_eq!(store.delete_update_operations(&[only]).unwrap(), 0);
}

#[test]
fn test_vuln_rows_dedup_across_operations() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("f");
    let v = vuln("alpine", "CVE-1", "a", "1.0");
    let o1 = store.update_vulnerabilities("alpine", &fp, &[v.clone()]).unwrap();
    let o2 = store.update_vulnerabilities("alpine", &fp, &[v]).unwrap();

    // the same row backs both operations, so the diff is empty
    let diff = store.get_update_diff(Some(o1), o2).unwrap();
    assert!(diff.added.is_empty());
    assert!(diff.removed.is_empty());
}

#[test]
fn test_get_applies_constraints_to_live_snapshot() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("f");
    store
        .update_vulnerabilities(
            "alpine",
            &fp,
            &[vuln("alpine", "CVE-2018-20187", "botan", "2.9.0-r0")],
        )
        .unwrap();

    let hits = store
        .get(
            &[record("1", "botan", "2.5.0-r0")],
            &[MatchConstraint::DistributionVersionID],
        )
        .unwrap();
    assert_eq!(hits["1"].len(), 1);
    assert_eq!(hits["1"][0].name, "CVE-2018-20187");

    // wrong distribution version: no candidates
    let mut other = record("1", "botan", "2.5.0-r0");
    other.distribution.as_mut().unwrap().version_id = "3.11".to_string();
    assert!(store
        .get(&[other], &[MatchConstraint::DistributionVersionID])
        .unwrap()
        .is_empty());

    // a superseding operation without the vuln retires it from the snapshot
    store
        .update_vulnerabilities("alpine", &fp, &[vuln("alpine", "CVE-OTHER", "zlib", "1.3")])
        .unwrap();
    assert!(store
        .get(
            &[record("1", "botan", "2.5.0-r0")],
            &[MatchConstraint::DistributionVersionID],
        )
        .unwrap()
        .is_empty());
}

#[test]
fn test_get_matches_source_package_name() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("f");
    store
        .update_vulnerabilities(
            "debian",
            &fp,
            &[vuln("debian", "CVE-42", "openssl", "3.0.12-1")],
        )
        .unwrap();

    let mut rec = record("7", "libssl3", "3.0.11-1");
    rec.package.source = Some(Box::new(Package {
        name: "openssl".to_string(),
        version: "3.0.11-1".to_string(),
        kind: stratum_core::PackageKind::Source,
        ..Default::default()
    }));
    rec.distribution = None;
    let hits = store.get(&[rec], &[]).unwrap();
    assert_eq!(hits["7"].len(), 1);
}

#[test]
fn test_enrichment_lookup_by_tag() {
    let store = Store::open_in_memory().unwrap();
    let fp = Fingerprint::new("f");
    store
        .update_enrichments(
            "cvss",
            &fp,
            &[
                EnrichmentRecord {
                    tags: vec!["CVE-2018-20187".to_string()],
                    enrichment: serde_json::json!({"baseScore": 6.5}),
                },
                EnrichmentRecord {
                    tags: vec!["CVE-1999-0001".to_string()],
                    enrichment: serde_json::json!({"baseScore": 2.0}),
                },
            ],
        )
        .unwrap();

    let blobs = store
        .get_enrichment("cvss", &["CVE-2018-20187".to_string()])
        .unwrap();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0]["baseScore"], 6.5);

    assert!(store
        .get_enrichment("cvss", &["CVE-0000-0000".to_string()])
        .unwrap()
        .is_empty());
}

#[test]
fn test_updater_status_lifecycle() {
    let store = Store::open_in_memory().unwrap();
    assert!(store.get_fingerprint("alpine").unwrap().is_none());

    let fp = Fingerprint::new("etag:abc");
    store.record_success("alpine", Some(&fp)).unwrap();
    assert_eq!(store.get_fingerprint("alpine").unwrap(), Some(fp.clone()));
    let st = store.updater_status("alpine").unwrap().unwrap();
    assert!(st.last_run_succeeded);
    assert!(st.last_success.is_some());
    assert!(st.last_error.is_none());

    // a failed attempt keeps the fingerprint and last success
    store.record_attempt("alpine", "connect timeout").unwrap();
    let st = store.updater_status("alpine").unwrap().unwrap();
    assert!(!st.last_run_succeeded);
    assert_eq!(st.last_error.as_deref(), Some("connect timeout"));
    assert_eq!(st.fingerprint, Some(fp.clone()));
    assert!(st.last_success.is_some());

    // an unchanged pass advances success without touching the fingerprint
    let before = st.last_success;
    store.record_success("alpine", None).unwrap();
    let st = store.updater_status("alpine").unwrap().unwrap();
    assert!(st.last_run_succeeded);
    assert_eq!(st.fingerprint, Some(fp));
    assert!(st.last_success >= before);
}

#[test]
fn test_store_persists_to_disk() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("vulns.db");
    let fp = Fingerprint::new("f");
    let reference = {
        let store = Store::open(&path).unwrap();
        store
            .update_vulnerabilities("alpine", &fp, &[vuln("alpine", "CVE-1", "a", "1.0")])
            .unwrap()
    };
    let store = Store::open(&path).unwrap();
    let latest = store
        .latest_update_operations(UpdateKind::Vulnerability)
        .unwrap();
    assert_eq!(latest["alpine"].reference, reference);
}
