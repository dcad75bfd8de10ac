//! apk database scanners

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::debug;

use stratum_core::{Package, PackageKind, Repository};
use stratum_indexer::{PackageScanner, RepositoryScanner};
use stratum_tarfs::TarFs;

use crate::INSTALLED_DB;

const REPOSITORIES_FILE: &str = "etc/apk/repositories";

/// Parses `lib/apk/db/installed`
///
/// Records are blank-line separated; within a record the first byte
/// selects the field: `P` name, `V` version, `A` arch, `o` origin
/// (source package), `c` commit, used as the repository hint.
#[derive(Debug, Default)]
pub struct ApkPackageScanner;

impl PackageScanner for ApkPackageScanner {
    fn name(&self) -> &'static str {
        "apk"
    }

    fn version(&self) -> &'static str {
        "2"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Package>> {
        if !layer.exists(INSTALLED_DB) {
            return Ok(vec![]);
        }
        let data = layer
            .read_file(INSTALLED_DB)
            .context("failed to read apk installed database")?;
        let text = String::from_utf8_lossy(&data);

        // origin packages interned by (name, version) so binaries sharing
        // an origin share one source value
        let mut sources: HashMap<(String, String), Box<Package>> = HashMap::new();
        let mut out = Vec::new();

        for block in text.split("\n\n") {
            let mut name = None;
            let mut version = None;
            let mut arch = None;
            let mut origin = None;
            let mut commit = None;
            for line in block.lines() {
                let Some((field, value)) = line.split_once(':') else {
                    continue;
                };
                match field {
                    "P" => name = Some(value.to_string()),
                    "V" => version = Some(value.to_string()),
                    "A" => arch = Some(value.to_string()),
                    "o" => origin = Some(value.to_string()),
                    "c" => commit = Some(value.to_string()),
                    _ => {}
                }
            }
            let (Some(name), Some(version)) = (name, version) else {
                continue;
            };

            let source = origin.map(|o| {
                sources
                    .entry((o.clone(), version.clone()))
                    .or_insert_with(|| {
                        Box::new(Package {
                            name: o,
                            version: version.clone(),
                            kind: PackageKind::Source,
                            package_db: INSTALLED_DB.to_string(),
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
                package_db: INSTALLED_DB.to_string(),
                repository_hint: commit,
                arch: arch.unwrap_or_default(),
                ..Default::default()
            });
        }
        debug!(packages = out.len(), "apk database parsed");
        Ok(out)
    }
}

/// Reads the configured apk repositories
#[derive(Debug, Default)]
pub struct ApkRepoScanner;

impl RepositoryScanner for ApkRepoScanner {
    fn name(&self) -> &'static str {
        "apk-repo"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Repository>> {
        if !layer.exists(REPOSITORIES_FILE) {
            return Ok(vec![]);
        }
        let data = layer
            .read_file(REPOSITORIES_FILE)
            .context("failed to read apk repositories")?;
        let text = String::from_utf8_lossy(&data);
        let mut out = Vec::new();
        for line in text.lines() {
            // tagged repos look like "@edge https://..."; take the URI
            let uri = line.trim().split_whitespace().last().unwrap_or("");
            if uri.is_empty() || uri.starts_with('#') {
                continue;
            }
            let name = uri.rsplit('/').next().unwrap_or(uri).to_string();
            out.push(Repository {
                name,
                uri: uri.to_string(),
                ..Default::default()
            });
        }
        Ok(out)
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

    const DB: &str = "P:libcrypto1.1\nV:1.1.1d-r0\nA:x86_64\no:openssl\nc:0c8ff29\n\n\
P:libssl1.1\nV:1.1.1d-r0\nA:x86_64\no:openssl\nc:0c8ff29\n\n\
P:musl\nV:1.1.22-r3\nA:x86_64\n";

    #[test]
    fn test_parse_installed_db() {
        let fs = build_tar(&[(INSTALLED_DB, DB)]);
        let pkgs = ApkPackageScanner.scan(&fs).unwrap();
        assert_eq!(pkgs.len(), 3);

        assert_eq!(pkgs[0].name, "libcrypto1.1");
        assert_eq!(pkgs[0].version, "1.1.1d-r0");
        assert_eq!(pkgs[0].arch, "x86_64");
        assert_eq!(pkgs[0].package_db, INSTALLED_DB);
        assert_eq!(pkgs[0].repository_hint.as_deref(), Some("0c8ff29"));

        // both ssl packages share the interned openssl origin
        let src0 = pkgs[0].source.as_ref().unwrap();
        let src1 = pkgs[1].source.as_ref().unwrap();
        assert_eq!(src0, src1);
        assert_eq!(src0.name, "openssl");
        assert_eq!(src0.kind, PackageKind::Source);

        assert!(pkgs[2].source.is_none());
    }

    #[test]
    fn test_missing_db_is_empty_not_error() {
        let fs = build_tar(&[("etc/hostname", "box\n")]);
        assert!(ApkPackageScanner.scan(&fs).unwrap().is_empty());
    }

    #[test]
    fn test_repositories() {
        let fs = build_tar(&[(
            REPOSITORIES_FILE,
            "https://dl-cdn.alpinelinux.org/alpine/v3.10/main\n\
             https://dl-cdn.alpinelinux.org/alpine/v3.10/community\n\
             # commented out\n",
        )]);
        let repos = ApkRepoScanner.scan(&fs).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "main");
        assert_eq!(repos[1].name, "community");
    }
}
