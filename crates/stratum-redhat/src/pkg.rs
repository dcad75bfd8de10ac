//! rpm database scanner

use std::io::Write;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use stratum_core::{Package, PackageKind};
use stratum_indexer::PackageScanner;
use stratum_tarfs::TarFs;

use crate::header;

/// Locations the SQLite rpm database shows up in, by vintage
const SQLITE_DBS: [&str; 3] = [
    "var/lib/rpm/rpmdb.sqlite",
    "usr/lib/sysimage/rpm/rpmdb.sqlite",
    "usr/share/rpm/rpmdb.sqlite",
];

/// Berkeley-DB layout used by older releases
const BDB_DB: &str = "var/lib/rpm/Packages";

/// Reads installed packages out of `rpmdb.sqlite`
///
/// The database keeps one header image per package in the `Packages`
/// table; each blob is decoded for name, EVR, arch, and source rpm. The
/// legacy Berkeley-DB layout is detected but not decoded.
#[derive(Debug, Default)]
pub struct RpmPackageScanner;

impl PackageScanner for RpmPackageScanner {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn version(&self) -> &'static str {
        "3"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Package>> {
        for db in SQLITE_DBS {
            if layer.exists(db) {
                return scan_sqlite(layer, db);
            }
        }
        if layer.exists(BDB_DB) {
            warn!("legacy Berkeley-DB rpm database present; not decoded");
        }
        Ok(vec![])
    }
}

fn scan_sqlite(layer: &TarFs, db: &str) -> Result<Vec<Package>> {
    // rusqlite wants a file on disk
    let blob = layer
        .read_file(db)
        .with_context(|| format!("failed to read {}", db))?;
    let mut spool = tempfile::NamedTempFile::new().context("failed to spool rpm database")?;
    spool
        .write_all(&blob)
        .context("failed to spool rpm database")?;

    let conn = rusqlite::Connection::open_with_flags(
        spool.path(),
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )
    .context("failed to open rpm database")?;

    let mut stmt = conn
        .prepare("SELECT blob FROM Packages")
        .context("rpm database has no Packages table")?;
    let blobs = stmt
        .query_map([], |r| r.get::<_, Vec<u8>>(0))
        .context("failed to iterate rpm packages")?;

    let mut out = Vec::new();
    for blob in blobs {
        let blob = blob.context("failed to read rpm header blob")?;
        let h = match header::parse(&blob) {
            Ok(h) => h,
            Err(e) => {
                // one undecodable header should not hide the rest
                warn!(error = format!("{:#}", e).as_str(), "skipping rpm header");
                continue;
            }
        };
        // the public-key pseudo packages are not inventory
        if h.name == "gpg-pubkey" {
            continue;
        }

        let source = h.source_rpm.as_deref().and_then(source_package).map(|(name, version)| {
            Box::new(Package {
                name,
                version,
                kind: PackageKind::Source,
                package_db: db.to_string(),
                ..Default::default()
            })
        });

        out.push(Package {
            name: h.name.clone(),
            version: h.evr(),
            kind: PackageKind::Binary,
            source,
            package_db: db.to_string(),
            arch: h.arch.clone().unwrap_or_default(),
            ..Default::default()
        });
    }
    debug!(packages = out.len(), db, "rpm database parsed");
    Ok(out)
}

/// Split `openssl-1.0.2k-25.el7_9.src.rpm` into name and version-release
fn source_package(source_rpm: &str) -> Option<(String, String)> {
    let stem = source_rpm
        .strip_suffix(".src.rpm")
        .or_else(|| source_rpm.strip_suffix(".nosrc.rpm"))?;
    // name-version-release: the last two dashes delimit version and release
    let (rest, release) = stem.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    Some((name.to_string(), format!("{}-{}", version, release)))
}
