//! Installed-distribution scanner
//!
//! Walks the layer for dist-info `METADATA` and egg-info `PKG-INFO`
//! files, the artifacts pip leaves behind for every installed
//! distribution.

use anyhow::{Context, Result};
use tracing::debug;

use stratum_core::{Package, PackageKind, Repository};
use stratum_indexer::{PackageScanner, RepositoryScanner};
use stratum_tarfs::TarFs;

use crate::normalize_name;

/// The repository all installed Python distributions resolve against
pub const PYPI_REPOSITORY: &str = "pypi";

/// Finds dist-info and egg-info metadata anywhere in the layer
#[derive(Debug, Default)]
pub struct PythonPackageScanner;

impl PackageScanner for PythonPackageScanner {
    fn name(&self) -> &'static str {
        "python"
    }

    fn version(&self) -> &'static str {
        "2"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Package>> {
        let mut out = Vec::new();
        for pattern in ["*.dist-info/METADATA", "*.egg-info/PKG-INFO", "*.egg-info"] {
            for path in layer.glob(pattern)? {
                // bare .egg-info can be a directory; only files parse
                match layer.stat(&path) {
                    Ok(info) if !info.is_dir() => {}
                    _ => continue,
                }
                let data = layer
                    .read_file(&path)
                    .with_context(|| format!("failed to read {}", path))?;
                if let Some(pkg) = parse_metadata(&data, &path) {
                    out.push(pkg);
                }
            }
        }
        // two patterns can surface one distribution twice
        out.sort_by(|a, b| a.filepath.cmp(&b.filepath));
        out.dedup_by(|a, b| a.name == b.name && a.version == b.version && a.package_db == b.package_db);
        debug!(packages = out.len(), "python distributions found");
        Ok(out)
    }
}

/// Core-metadata headers: `Name:` and `Version:` up to the first blank
/// line (the body is a long description)
fn parse_metadata(data: &[u8], path: &str) -> Option<Package> {
    let text = String::from_utf8_lossy(data);
    let mut name = None;
    let mut version = None;
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Name: ") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Version: ") {
            version = Some(v.trim().to_string());
        }
    }
    let (name, version) = (name?, version?);

    // site-packages (or equivalent) is the database the distribution
    // is installed into
    let db = path
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .and_then(|dir| dir.rsplit_once('/').map(|(parent, _)| parent))
        .unwrap_or("")
        .to_string();

    Some(Package {
        name: normalize_name(&name),
        version,
        kind: PackageKind::Binary,
        package_db: db,
        filepath: Some(path.to_string()),
        ..Default::default()
    })
}

/// Emits the PyPI repository whenever Python distributions are present
#[derive(Debug, Default)]
pub struct PythonRepoScanner;

impl RepositoryScanner for PythonRepoScanner {
    fn name(&self) -> &'static str {
        "python-repo"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Repository>> {
        for pattern in ["*.dist-info/METADATA", "*.egg-info/PKG-INFO"] {
            if !layer.glob(pattern)?.is_empty() {
                return Ok(vec![Repository {
                    name: PYPI_REPOSITORY.to_string(),
                    uri: "https://pypi.org/simple".to_string(),
                    ..Default::default()
                }]);
            }
        }
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_tar(files: &[(&str, &str)]) -> TarFs {
        let mut b = tar::Builder::new(Vec::new());
        for (path, content) in files {
            let mut h = tar::Header::new_ustar();
            h.set_size(content.len() as u64);
            h.set_mode(0o644);
            h.set_cksum();
            b.append_data(&mut h, path, content.as_bytes()).unwrap();
        }
        TarFs::new(Cursor::new(b.into_inner().unwrap())).unwrap()
    }

    const METADATA: &str = "Metadata-Version: 2.1\nName: Requests\nVersion: 2.19.1\n\
Summary: Python HTTP for Humans.\n\nrequests\n========\nVersion: fooled-you\n";

    #[test]
    fn test_scan_dist_info() {
        let fs = build_tar(&[(
            "usr/lib/python3.7/site-packages/requests-2.19.1.dist-info/METADATA",
            METADATA,
        )]);
        let pkgs = PythonPackageScanner.scan(&fs).unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].name, "requests");
        assert_eq!(pkgs[0].version, "2.19.1");
        assert_eq!(pkgs[0].package_db, "usr/lib/python3.7/site-packages");
    }

    #[test]
    fn test_scan_egg_info_file() {
        let fs = build_tar(&[(
            "usr/lib/python2.7/site-packages/six-1.11.0.egg-info/PKG-INFO",
            "Metadata-Version: 1.1\nName: six\nVersion: 1.11.0\n",
        )]);
        let pkgs = PythonPackageScanner.scan(&fs).unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].name, "six");
    }

    #[test]
    fn test_repo_scanner_tracks_presence() {
        let with = build_tar(&[(
            "app/venv/lib/python3.11/site-packages/flask-3.0.0.dist-info/METADATA",
            "Name: Flask\nVersion: 3.0.0\n",
        )]);
        assert_eq!(PythonRepoScanner.scan(&with).unwrap().len(), 1);

        let without = build_tar(&[("etc/hostname", "box\n")]);
        assert!(PythonRepoScanner.scan(&without).unwrap().is_empty());
    }
}
