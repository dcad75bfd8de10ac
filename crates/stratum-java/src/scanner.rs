//! Java archive scanner
//!
//! Walks the layer for jar/war/ear files and identifies each one by, in
//! preference order: an embedded `pom.properties`, the manifest's
//! implementation headers, and finally the `name-version.jar` filename
//! convention. War and ear archives are opened one nesting level deep
//! for the jars they bundle.

use std::io::{Cursor, Read};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use stratum_core::{Package, PackageKind, Repository};
use stratum_indexer::{PackageScanner, RepositoryScanner};
use stratum_tarfs::TarFs;

/// The repository all identified archives resolve against
pub const MAVEN_REPOSITORY: &str = "maven";

/// Bound on a nested jar pulled out of a war/ear
const INNER_JAR_MAX: u64 = 50 * 1024 * 1024;

lazy_static! {
    static ref FILENAME_RE: Regex =
        Regex::new(r"^(.+?)-(\d[0-9A-Za-z._+-]*)\.(?:jar|war|ear)$").expect("static regex");
}

#[derive(Debug, PartialEq)]
struct Identity {
    group: Option<String>,
    artifact: String,
    version: String,
}

impl Identity {
    fn package_name(&self) -> String {
        match &self.group {
            Some(g) => format!("{}:{}", g, self.artifact),
            None => self.artifact.clone(),
        }
    }
}

/// Finds and identifies Java archives in a layer
#[derive(Debug, Default)]
pub struct JavaPackageScanner;

impl PackageScanner for JavaPackageScanner {
    fn name(&self) -> &'static str {
        "java"
    }

    fn version(&self) -> &'static str {
        "3"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Package>> {
        let mut out = Vec::new();
        for pattern in ["*.jar", "*.war", "*.ear"] {
            for path in layer.glob(pattern)? {
                let archive = match layer.nested_archive(&path) {
                    Ok(Some(a)) => Some(a),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(path = path.as_str(), error = format!("{:#}", e).as_str(), "unreadable archive");
                        continue;
                    }
                };
                let Some(mut archive) = archive else {
                    continue;
                };

                let base = path.rsplit('/').next().unwrap_or(&path);
                for identity in identify(&mut archive, base)? {
                    out.push(package_for(identity, &path));
                }

                // one level of nesting: jars bundled in a war/ear
                for inner in bundled_jars(&mut archive)? {
                    let (inner_name, data) = inner;
                    let mut nested = match zip::ZipArchive::new(Cursor::new(data)) {
                        Ok(z) => z,
                        Err(_) => continue,
                    };
                    let inner_base = inner_name.rsplit('/').next().unwrap_or(&inner_name);
                    for identity in identify(&mut nested, inner_base)? {
                        out.push(package_for(identity, &format!("{}:{}", path, inner_name)));
                    }
                }
            }
        }
        out.sort_by(|a, b| a.filepath.cmp(&b.filepath).then_with(|| a.name.cmp(&b.name)));
        out.dedup();
        debug!(packages = out.len(), "java archives identified");
        Ok(out)
    }
}

fn package_for(identity: Identity, filepath: &str) -> Package {
    let db = filepath.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    Package {
        name: identity.package_name(),
        version: identity.version,
        kind: PackageKind::Binary,
        module: identity.group,
        package_db: format!("maven:{}", db),
        filepath: Some(filepath.to_string()),
        ..Default::default()
    }
}

/// Identify one archive: pom.properties > manifest > filename
fn identify<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    base_name: &str,
) -> Result<Vec<Identity>> {
    let mut from_pom = Vec::new();
    let mut manifest: Option<Identity> = None;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("corrupt zip entry")?;
        let name = file.name().to_string();
        if name.starts_with("META-INF/maven/") && name.ends_with("/pom.properties") {
            let mut text = String::new();
            if file.read_to_string(&mut text).is_ok() {
                if let Some(identity) = parse_pom_properties(&text) {
                    from_pom.push(identity);
                }
            }
        } else if name == "META-INF/MANIFEST.MF" && manifest.is_none() {
            let mut text = String::new();
            if file.read_to_string(&mut text).is_ok() {
                manifest = parse_manifest(&text);
            }
        }
    }

    if !from_pom.is_empty() {
        // shaded jars legitimately carry several pom.properties
        from_pom.sort_by(|a, b| a.package_name().cmp(&b.package_name()));
        return Ok(from_pom);
    }
    if let Some(identity) = manifest {
        return Ok(vec![identity]);
    }
    Ok(FILENAME_RE
        .captures(base_name)
        .map(|c| Identity {
            group: None,
            artifact: c[1].to_string(),
            version: c[2].to_string(),
        })
        .into_iter()
        .collect())
}

fn parse_pom_properties(text: &str) -> Option<Identity> {
    let mut group = None;
    let mut artifact = None;
    let mut version = None;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "groupId" => group = Some(value.trim().to_string()),
                "artifactId" => artifact = Some(value.trim().to_string()),
                "version" => version = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    Some(Identity {
        group,
        artifact: artifact?,
        version: version?,
    })
}

fn parse_manifest(text: &str) -> Option<Identity> {
    let mut title = None;
    let mut version = None;
    for line in text.lines() {
        if let Some(v) = line.strip_prefix("Implementation-Title: ") {
            title = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Implementation-Version: ") {
            version = Some(v.trim().to_string());
        }
    }
    Some(Identity {
        group: None,
        artifact: title?,
        version: version?,
    })
}

/// Read bundled jars out of a war/ear, bounded per entry
fn bundled_jars<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("corrupt zip entry")?;
        let name = file.name().to_string();
        if !name.ends_with(".jar") {
            continue;
        }
        if file.size() > INNER_JAR_MAX {
            warn!(entry = name.as_str(), size = file.size(), "bundled jar over ceiling");
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        if file.read_to_end(&mut data).is_ok() {
            out.push((name, data));
        }
    }
    Ok(out)
}

/// Emits the Maven repository whenever archives are present
#[derive(Debug, Default)]
pub struct JavaRepoScanner;

impl RepositoryScanner for JavaRepoScanner {
    fn name(&self) -> &'static str {
        "java-repo"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn scan(&self, layer: &TarFs) -> Result<Vec<Repository>> {
        for pattern in ["*.jar", "*.war", "*.ear"] {
            if !layer.glob(pattern)?.is_empty() {
                return Ok(vec![Repository {
                    name: MAVEN_REPOSITORY.to_string(),
                    uri: "https://repo1.maven.org/maven2".to_string(),
                    ..Default::default()
                }]);
            }
        }
        Ok(vec![])
    }
}
