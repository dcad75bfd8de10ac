//! Debian and Ubuntu distribution detection

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lazy_static::lazy_static;

use stratum_core::Distribution;
use stratum_indexer::{osrelease, DistributionScanner};
use stratum_tarfs::TarFs;

const OS_RELEASE: &str = "etc/os-release";
const OS_RELEASE_ALT: &str = "usr/lib/os-release";

lazy_static! {
    // codename -> numeric version for the releases the tracker feeds cover
    static ref DEBIAN_RELEASES: HashMap<&'static str, &'static str> = HashMap::from([
        ("stretch", "9"),
        ("buster", "10"),
        ("bullseye", "11"),
        ("bookworm", "12"),
        ("trixie", "13"),
    ]);
    static ref DEBIAN_INTERNED: Mutex<HashMap<String, Distribution>> = Mutex::new(HashMap::new());
    // codename -> version id for the series the OVAL feeds cover
    static ref UBUNTU_RELEASES: HashMap<&'static str, &'static str> = HashMap::from([
        ("trusty", "14.04"),
        ("xenial", "16.04"),
        ("bionic", "18.04"),
        ("focal", "20.04"),
        ("jammy", "22.04"),
        ("mantic", "23.10"),
        ("noble", "24.04"),
    ]);
    static ref UBUNTU_INTERNED: Mutex<HashMap<String, Distribution>> = Mutex::new(HashMap::new());
}

/// Interned Ubuntu distribution looked up by codename alone
pub fn ubuntu_release_by_codename(codename: &str) -> Option<Distribution> {
    UBUNTU_RELEASES
        .get(codename)
        .map(|version| ubuntu_release(version, codename))
}

/// Interned Debian distribution for a codename, when it is a known release
pub fn debian_release(codename: &str) -> Option<Distribution> {
    let version = DEBIAN_RELEASES.get(codename)?;
    let mut map = DEBIAN_INTERNED.lock().expect("debian release map poisoned");
    Some(
        map.entry(codename.to_string())
            .or_insert_with(|| Distribution {
                did: "debian".to_string(),
                name: "Debian GNU/Linux".to_string(),
                version: version.to_string(),
                version_id: version.to_string(),
                version_code_name: codename.to_string(),
                pretty_name: format!("Debian GNU/Linux {} ({})", version, codename),
                ..Default::default()
            })
            .clone(),
    )
}

/// Interned Ubuntu distribution for a (version id, codename) pair
pub fn ubuntu_release(version_id: &str, codename: &str) -> Distribution {
    let mut map = UBUNTU_INTERNED.lock().expect("ubuntu release map poisoned");
    map.entry(codename.to_string())
        .or_insert_with(|| Distribution {
            did: "ubuntu".to_string(),
            name: "Ubuntu".to_string(),
            version: version_id.to_string(),
            version_id: version_id.to_string(),
            version_code_name: codename.to_string(),
            pretty_name: format!("Ubuntu {}", version_id),
            ..Default::default()
        })
        .clone()
}

fn read_os_release(layer: &TarFs) -> Result<Option<HashMap<String, String>>> {
    for path in [OS_RELEASE, OS_RELEASE_ALT] {
        if layer.exists(path) {
            let data = layer
                .read_file(path)
                .with_context(|| format!("failed to read {}", path))?;
            return Ok(Some(osrelease::parse(&data)));
        }
    }
    Ok(None)
}

/// Codename from a `VERSION` field like `"12 (bookworm)"`
fn codename_in_parens(version: &str) -> Option<String> {
    let start = version.find('(')?;
    let end = version[start..].find(')')? + start;
    let inner = &version[start + 1..end];
    Some(
        inner
            .split_whitespace()
            .next()
            .unwrap_or(inner)
            .to_ascii_lowercase(),
    )
}

/// Detects Debian from os-release
#[derive(Debug, Default)]
pub struct DebianDistScanner;

impl DistributionScanner for DebianDistScanner {
    fn name(&self) -> &'static str {
        "debian-dist"
    }

    fn version(&self) -> &'static str {
        "2"
    }

    fn scan(&self, layer: &TarFs) -> Result<Option<Distribution>> {
        let Some(kv) = read_os_release(layer)? else {
            return Ok(None);
        };
        if kv.get("ID").map(String::as_str) != Some("debian") {
            return Ok(None);
        }
        let codename = kv
            .get("VERSION_CODENAME")
            .cloned()
            .or_else(|| kv.get("VERSION").and_then(|v| codename_in_parens(v)));
        Ok(codename.and_then(|c| debian_release(&c)))
    }
}

/// Detects Ubuntu from os-release
#[derive(Debug, Default)]
pub struct UbuntuDistScanner;

impl DistributionScanner for UbuntuDistScanner {
    fn name(&self) -> &'static str {
        "ubuntu-dist"
    }

    fn version(&self) -> &'static str {
        "2"
    }

    fn scan(&self, layer: &TarFs) -> Result<Option<Distribution>> {
        let Some(kv) = read_os_release(layer)? else {
            return Ok(None);
        };
        if kv.get("ID").map(String::as_str) != Some("ubuntu") {
            return Ok(None);
        }
        let Some(version_id) = kv.get("VERSION_ID") else {
            return Ok(None);
        };
        let codename = kv
            .get("VERSION_CODENAME")
            .cloned()
            .or_else(|| kv.get("VERSION").and_then(|v| codename_in_parens(v)));
        Ok(codename.map(|c| ubuntu_release(version_id, &c)))
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

    #[test]
    fn test_debian_bookworm() {
        let fs = build_tar(&[(
            "etc/os-release",
            "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\n\
             VERSION_ID=\"12\"\nVERSION=\"12 (bookworm)\"\nVERSION_CODENAME=bookworm\n",
        )]);
        let dist = DebianDistScanner.scan(&fs).unwrap().unwrap();
        assert_eq!(dist.did, "debian");
        assert_eq!(dist.version_id, "12");
        assert_eq!(dist.version_code_name, "bookworm");
    }

    #[test]
    fn test_debian_codename_from_version_parens() {
        let fs = build_tar(&[(
            "etc/os-release",
            "ID=debian\nVERSION_ID=\"10\"\nVERSION=\"10 (buster)\"\n",
        )]);
        let dist = DebianDistScanner.scan(&fs).unwrap().unwrap();
        assert_eq!(dist.version_code_name, "buster");
    }

    #[test]
    fn test_ubuntu_bionic() {
        let fs = build_tar(&[(
            "etc/os-release",
            "NAME=\"Ubuntu\"\nVERSION=\"18.04.3 LTS (Bionic Beaver)\"\nID=ubuntu\n\
             ID_LIKE=debian\nVERSION_ID=\"18.04\"\nVERSION_CODENAME=bionic\n",
        )]);
        let dist = UbuntuDistScanner.scan(&fs).unwrap().unwrap();
        assert_eq!(dist.did, "ubuntu");
        assert_eq!(dist.version_id, "18.04");
        assert_eq!(dist.version_code_name, "bionic");
    }

    #[test]
    fn test_ubuntu_is_not_debian() {
        let fs = build_tar(&[(
            "etc/os-release",
            "ID=ubuntu\nVERSION_ID=\"18.04\"\nVERSION_CODENAME=bionic\n",
        )]);
        assert!(DebianDistScanner.scan(&fs).unwrap().is_none());
    }
}
