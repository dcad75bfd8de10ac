//! dpkg status database scanner

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::debug;

use stratum_core::{Package, PackageKind};
use stratum_indexer::PackageScanner;
use stratum_tarfs::TarFs;

use crate::{STATUS_DB, STATUS_D_GLOB};

/// Parses `var/lib/dpkg/status` and the distroless `status.d` directory
///
/// Only packages whose `Status` says installed are reported. `Source:`
/// lines may carry a parenthesized version when it differs from the
/// binary's.
#[derive(Debug, Default)]
pub struct DpkgPackageScanner;

impl PackageScanner for DpkgPackageScanner {
    fn name(&self) -> &'static str {
        "dpkg"
    }

    fn version(&self) -> &'static str {
        "3"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Package>> {
        let mut out = Vec::new();
        if layer.exists(STATUS_DB) {
            let data = layer
                .read_file(STATUS_DB)
                .context("failed to read dpkg status")?;
            parse_status(&data, STATUS_DB, true, &mut out);
        }
        for path in layer.glob(STATUS_D_GLOB)? {
            let data = layer
                .read_file(&path)
                .with_context(|| format!("failed to read {}", path))?;
            // status.d files have no Status field; presence means installed
            parse_status(&data, &path, false, &mut out);
        }
        debug!(packages = out.len(), "dpkg database parsed");
        Ok(out)
    }
}

fn parse_status(data: &[u8], db: &str, require_installed: bool, out: &mut Vec<Package>) {
    let text = String::from_utf8_lossy(data);
    let mut sources: HashMap<(String, String), Box<Package>> = HashMap::new();

    for block in text.split("\n\n") {
        let mut name = None;
        let mut version: Option<String> = None;
        let mut arch = None;
        let mut source_field = None;
        let mut installed = !require_installed;
        for line in block.lines() {
            if let Some(v) = line.strip_prefix("Package: ") {
                name = Some(v.to_string());
            } else if let Some(v) = line.strip_prefix("Version: ") {
                version = Some(v.to_string());
            } else if let Some(v) = line.strip_prefix("Architecture: ") {
                arch = Some(v.to_string());
            } else if let Some(v) = line.strip_prefix("Source: ") {
                source_field = Some(v.to_string());
            } else if let Some(v) = line.strip_prefix("Status: ") {
                installed = v.contains("installed") && !v.contains("not-installed");
            }
        }
        let (Some(name), Some(version)) = (name, version) else {
            continue;
        };
        if !installed {
            continue;
        }

        let source = source_field.map(|s| {
            // "openssl (3.0.11-1)" names a differing source version
            let (src_name, src_version) = match s.split_once('(') {
                Some((n, v)) => (
                    n.trim().to_string(),
                    v.trim_end_matches(')').trim().to_string(),
                ),
                None => (s.trim().to_string(), version.clone()),
            };
            sources
                .entry((src_name.clone(), src_version.clone()))
                .or_insert_with(|| {
                    Box::new(Package {
                        name: src_name,
                        version: src_version,
                        kind: PackageKind::Source,
                        package_db: db.to_string(),
                        ..Default::default()
                    })
                })
                .clone()
        });

        out.push(Package {
            name,
            version,
            kind: PackageKind::Binary,
            source,
            package_db: db.to_string(),
            arch: arch.unwrap_or_default(),
            ..Default::default()
        });
    }
}
