//! Package URL bridging
//!
//! Index records render to purls for interchange and parse back. The
//! mapping keeps enough of the record to identify it: type from the
//! packaging ecosystem, version, arch, and the distribution pinned in a
//! `distro` qualifier.

use std::collections::BTreeMap;
use std::str::FromStr;

use packageurl::PackageUrl;

use crate::package::{Distribution, Package, Repository};
use crate::report::IndexRecord;

#[derive(Debug, thiserror::Error)]
pub enum PurlError {
    #[error("record has no package-url mapping")]
    Unmapped,
    #[error("packageurl problem {0}")]
    Package(#[from] packageurl::Error),
}

/// Render a record as a purl string
pub fn from_record(record: &IndexRecord) -> Result<String, PurlError> {
    let pkg = &record.package;
    let dist = record.distribution.as_ref();
    let repo = record.repository.as_ref().map(|r| r.name.as_str());

    let (ty, namespace, name) = match (dist.map(|d| d.did.as_str()), repo) {
        (Some("alpine"), _) => ("apk", Some("alpine".to_string()), pkg.name.clone()),
        (Some(did @ ("debian" | "ubuntu")), _) => ("deb", Some(did.to_string()), pkg.name.clone()),
        (Some("rhel"), _) => ("rpm", Some("redhat".to_string()), pkg.name.clone()),
        (_, Some("pypi")) => ("pypi", None, pkg.name.to_ascii_lowercase()),
        (_, Some("maven")) => match pkg.name.split_once(':') {
            Some((group, artifact)) => {
                ("maven", Some(group.to_string()), artifact.to_string())
            }
            None => ("maven", pkg.module.clone(), pkg.name.clone()),
        },
        (_, Some("crates.io")) => ("cargo", None, pkg.name.clone()),
        _ => return Err(PurlError::Unmapped),
    };

    let mut purl = PackageUrl::new(ty, name)?;
    if let Some(ns) = &namespace {
        purl.with_namespace(ns);
    }
    if !pkg.version.is_empty() {
        purl.with_version(&pkg.version);
    }
    if !pkg.arch.is_empty() {
        purl.add_qualifier("arch", &pkg.arch)?;
    }
    if let Some(d) = dist {
        if !d.did.is_empty() && !d.version_id.is_empty() {
            purl.add_qualifier("distro", format!("{}-{}", d.did, d.version_id))?;
        }
    }
    Ok(purl.to_string())
}

/// Parse a purl string back into a record
pub fn to_record(s: &str) -> Result<IndexRecord, PurlError> {
    let purl = PackageUrl::from_str(s)?;
    let qualifiers: BTreeMap<String, String> = purl
        .qualifiers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut package = Package {
        name: purl.name().to_string(),
        version: purl.version().unwrap_or_default().to_string(),
        arch: qualifiers.get("arch").cloned().unwrap_or_default(),
        ..Default::default()
    };

    let distribution = qualifiers.get("distro").map(|d| {
        let (did, version_id) = d.rsplit_once('-').unwrap_or((d.as_str(), ""));
        Distribution {
            did: did.to_string(),
            version: version_id.to_string(),
            version_id: version_id.to_string(),
            ..Default::default()
        }
    });

    let repository = match purl.ty() {
        "pypi" => Some(Repository {
            name: "pypi".to_string(),
            ..Default::default()
        }),
        "maven" => {
            if let Some(ns) = purl.namespace() {
                package.module = Some(ns.to_string());
                package.name = format!("{}:{}", ns, purl.name());
            }
            Some(Repository {
                name: "maven".to_string(),
                ..Default::default()
            })
        }
        "cargo" => Some(Repository {
            name: "crates.io".to_string(),
            ..Default::default()
        }),
        _ => None,
    };

    Ok(IndexRecord {
        package,
        distribution,
        repository,
    })
}
