//! End-to-end scenarios: image tar in, vulnerability report out

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use stratum::defaults;
use stratum_core::{
    Algorithm, CancelToken, Distribution, Fingerprint, IndexState, Layer, Manifest, Package,
    Severity, Vulnerability,
};
use stratum_indexer::{digest_blob, Indexer, LayerArena};
use stratum_matcher::MatchingEngine;
use stratum_store::Store;
use stratum_updater::Updater;

fn build_tar(files: &[(&str, &str)]) -> Vec<u8> {
    let mut b = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut h = tar::Header::new_ustar();
        h.set_size(content.len() as u64);
        h.set_mode(0o644);
        h.set_cksum();
        b.append_data(&mut h, path, content.as_bytes()).unwrap();
    }
    b.into_inner().unwrap()
}

fn layer_from(dir: &Path, name: &str, blob: &[u8]) -> Layer {
    let path = dir.join(name);
    std::fs::write(&path, blob).unwrap();
    Layer::from_local(digest_blob(Algorithm::Sha256, blob), path)
}

fn indexer(dir: &Path) -> Indexer {
    Indexer::new(
        LayerArena::new(dir.join("arena"), ureq::Agent::new_with_defaults()).unwrap(),
        Arc::new(defaults::registry()),
    )
}

fn engine() -> MatchingEngine {
    MatchingEngine::new(defaults::matchers(&[]), vec![], vec![])
}

const ALPINE_OS_RELEASE: &str = "NAME=\"Alpine Linux\"\nID=alpine\nVERSION_ID=3.10.3\n\
PRETTY_NAME=\"Alpine Linux v3.10\"\n";

const ALPINE_APK_DB: &str = "P:botan\nV:2.5.0-r0\nA:x86_64\n\nP:musl\nV:1.1.22-r3\nA:x86_64\n";

fn alpine_secdb(botan_fixed: &str) -> String {
    format!(
        r#"{{"packages": [{{"pkg": {{"name": "botan", "secfixes": {{"{}": ["CVE-2018-20187"]}}}}}}]}}"#,
        botan_fixed
    )
}

/// Seed the store the way an update pass would, via the real updater's
/// parse path
fn seed_alpine(store: &Store, secdb: &str) {
    let updater = stratum_alpine::SecdbUpdater::new(
        "https://secdb.alpinelinux.org",
        "v3.10",
        "main",
        ureq::Agent::new_with_defaults(),
    );
    let vulns = updater
        .parse(&CancelToken::new(), Box::new(Cursor::new(secdb.as_bytes().to_vec())))
        .unwrap();
    store
        .update_vulnerabilities(&updater.name(), &Fingerprint::new("test"), &vulns)
        .unwrap();
}

#[test]
fn test_alpine_v310_botan_cve() {
    let tmp = tempfile::TempDir::new().unwrap();
    let layer = build_tar(&[
        ("etc/os-release", ALPINE_OS_RELEASE),
        ("lib/apk/db/installed", ALPINE_APK_DB),
    ]);
    let manifest = Manifest {
        hash: digest_blob(Algorithm::Sha256, b"alpine-image"),
        layers: vec![layer_from(tmp.path(), "l0.tar", &layer)],
    };

    let cancel = CancelToken::new();
    let index = indexer(tmp.path()).index(&cancel, &manifest);
    assert_eq!(index.state, IndexState::IndexFinished);
    assert_eq!(index.packages.len(), 2);
    assert_eq!(index.distributions.len(), 1);

    let store = Store::open_in_memory().unwrap();
    seed_alpine(&store, &alpine_secdb("2.9.0-r0"));

    let report = engine().match_report(&cancel, &store, &index).unwrap();
    // exactly one finding, for botan
    assert_eq!(report.vulnerabilities.len(), 1);
    let vuln = report.vulnerabilities.values().next().unwrap();
    assert_eq!(vuln.name, "CVE-2018-20187");
    assert_eq!(vuln.package.as_ref().unwrap().name, "botan");

    let affected: Vec<_> = report
        .package_vulnerabilities
        .keys()
        .map(|id| report.packages[id].name.as_str())
        .collect();
    assert_eq!(affected, vec!["botan"]);
}

#[test]
fn test_alpine_pending_triage_sentinel_reports_nothing() {
    let tmp = tempfile::TempDir::new().unwrap();
    let layer = build_tar(&[
        ("etc/os-release", ALPINE_OS_RELEASE),
        ("lib/apk/db/installed", ALPINE_APK_DB),
    ]);
    let manifest = Manifest {
        hash: digest_blob(Algorithm::Sha256, b"alpine-image"),
        layers: vec![layer_from(tmp.path(), "l0.tar", &layer)],
    };

    let cancel = CancelToken::new();
    let index = indexer(tmp.path()).index(&cancel, &manifest);

    let store = Store::open_in_memory().unwrap();
    seed_alpine(&store, &alpine_secdb("0"));

    let report = engine().match_report(&cancel, &store, &index).unwrap();
    assert!(report.vulnerabilities.is_empty());
    assert!(report.package_vulnerabilities.is_empty());
}

#[test]
fn test_ubuntu_bionic_unfixed_cve_matches_any_version() {
    let tmp = tempfile::TempDir::new().unwrap();
    let layer = build_tar(&[
        (
            "etc/os-release",
            "NAME=\"Ubuntu\"\nVERSION=\"18.04.3 LTS (Bionic Beaver)\"\nID=ubuntu\n\
             VERSION_ID=\"18.04\"\nVERSION_CODENAME=bionic\n",
        ),
        (
            "var/lib/dpkg/status",
            "Package: libssl1.1\nStatus: install ok installed\nArchitecture: amd64\n\
             Version: 1.1.1-1ubuntu2.1~18.04.13\nSource: openssl\n",
        ),
    ]);
    let manifest = Manifest {
        hash: digest_blob(Algorithm::Sha256, b"ubuntu-image"),
        layers: vec![layer_from(tmp.path(), "l0.tar", &layer)],
    };

    let cancel = CancelToken::new();
    let index = indexer(tmp.path()).index(&cancel, &manifest);
    assert_eq!(index.state, IndexState::IndexFinished);

    let store = Store::open_in_memory().unwrap();
    store
        .update_vulnerabilities(
            "ubuntu-bionic-updater",
            &Fingerprint::new("test"),
            &[Vulnerability {
                updater: "ubuntu-bionic-updater".to_string(),
                name: "CVE-2018-90001".to_string(),
                severity: "Medium".to_string(),
                normalized_severity: Severity::Medium,
                package: Some(Package {
                    name: "openssl".to_string(),
                    ..Default::default()
                }),
                dist: Some(Distribution {
                    did: "ubuntu".to_string(),
                    version_id: "18.04".to_string(),
                    version_code_name: "bionic".to_string(),
                    ..Default::default()
                }),
                // no fix released: every installed version is affected
                fixed_in_version: String::new(),
                ..Default::default()
            }],
        )
        .unwrap();

    let report = engine().match_report(&cancel, &store, &index).unwrap();
    assert_eq!(report.vulnerabilities.len(), 1);
    // matched through the source package, reported on the binary
    let (pkg_id, vuln_ids) = report.package_vulnerabilities.iter().next().unwrap();
    assert_eq!(report.packages[pkg_id].name, "libssl1.1");
    assert_eq!(report.vulnerabilities[&vuln_ids[0]].name, "CVE-2018-90001");
}

#[test]
fn test_whiteout_empties_package_database() {
    let tmp = tempfile::TempDir::new().unwrap();
    let l0 = build_tar(&[(
        "var/lib/dpkg/status",
        "Package: foo\nStatus: install ok installed\nVersion: 1.0\nArchitecture: amd64\n",
    )]);
    let l1 = build_tar(&[("var/lib/dpkg/.wh.status", "")]);
    let manifest = Manifest {
        hash: digest_blob(Algorithm::Sha256, b"whiteout-image"),
        layers: vec![
            layer_from(tmp.path(), "l0.tar", &l0),
            layer_from(tmp.path(), "l1.tar", &l1),
        ],
    };

    let index = indexer(tmp.path()).index(&CancelToken::new(), &manifest);
    assert_eq!(index.state, IndexState::IndexFinished);
    assert!(index.packages.is_empty());
}

#[test]
fn test_indexing_is_deterministic() {
    let tmp = tempfile::TempDir::new().unwrap();
    let layer = build_tar(&[
        ("etc/os-release", ALPINE_OS_RELEASE),
        ("lib/apk/db/installed", ALPINE_APK_DB),
    ]);
    let manifest = Manifest {
        hash: digest_blob(Algorithm::Sha256, b"alpine-image"),
        layers: vec![layer_from(tmp.path(), "l0.tar", &layer)],
    };

    let cancel = CancelToken::new();
    let one = indexer(tmp.path()).index(&cancel, &manifest);
    let two = indexer(tmp.path()).index(&cancel, &manifest);
    assert_eq!(
        serde_json::to_string(&one).unwrap(),
        serde_json::to_string(&two).unwrap()
    );
}
