//! Red Hat family distribution detection

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;

use stratum_core::Distribution;
use stratum_indexer::{osrelease, DistributionScanner};
use stratum_tarfs::TarFs;

const OS_RELEASE: &str = "etc/os-release";
const OS_RELEASE_ALT: &str = "usr/lib/os-release";
const REDHAT_RELEASE: &str = "etc/redhat-release";

lazy_static! {
    static ref INTERNED: Mutex<HashMap<u32, Distribution>> = Mutex::new(HashMap::new());
    static ref RELEASE_RE: Regex =
        Regex::new(r"release (\d+)").expect("static regex");
}

/// Interned distribution value per major release
pub fn release(major: u32) -> Distribution {
    let mut map = INTERNED.lock().expect("rhel release map poisoned");
    map.entry(major)
        .or_insert_with(|| Distribution {
            did: "rhel".to_string(),
            name: "Red Hat Enterprise Linux Server".to_string(),
            version: major.to_string(),
            version_id: major.to_string(),
            cpe: Some(format!("cpe:/o:redhat:enterprise_linux:{}", major)),
            pretty_name: format!("Red Hat Enterprise Linux Server {}", major),
            ..Default::default()
        })
        .clone()
}

/// Detects RHEL and its rebuilds from os-release or redhat-release
#[derive(Debug, Default)]
pub struct RedhatDistScanner;

impl DistributionScanner for RedhatDistScanner {
    fn name(&self) -> &'static str {
        "rhel-dist"
    }

    fn version(&self) -> &'static str {
        "2"
    }

    fn scan(&self, layer: &TarFs) -> Result<Option<Distribution>> {
        for path in [OS_RELEASE, OS_RELEASE_ALT] {
            if !layer.exists(path) {
                continue;
            }
            let data = layer
                .read_file(path)
                .with_context(|| format!("failed to read {}", path))?;
            let kv = osrelease::parse(&data);
            let id = kv.get("ID").map(String::as_str).unwrap_or("");
            // rebuilds track RHEL errata close enough for matching
            if !matches!(id, "rhel" | "centos" | "almalinux" | "rocky") {
                return Ok(None);
            }
            let major = kv
                .get("VERSION_ID")
                .and_then(|v| v.split('.').next())
                .and_then(|v| v.parse().ok());
            return Ok(major.map(release));
        }

        if layer.exists(REDHAT_RELEASE) {
            let data = layer
                .read_file(REDHAT_RELEASE)
                .context("failed to read etc/redhat-release")?;
            let text = String::from_utf8_lossy(&data);
            let major = RELEASE_RE
                .captures(&text)
                .and_then(|c| c[1].parse().ok());
            return Ok(major.map(release));
        }
        Ok(None)
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
    fn test_detect_rhel_from_os_release() {
        let fs = build_tar(&[(
            "etc/os-release",
            "NAME=\"Red Hat Enterprise Linux\"\nID=\"rhel\"\nVERSION_ID=\"8.4\"\n\
             CPE_NAME=\"cpe:/o:redhat:enterprise_linux:8.4:GA\"\n",
        )]);
        let dist = RedhatDistScanner.scan(&fs).unwrap().unwrap();
        assert_eq!(dist.did, "rhel");
        assert_eq!(dist.version_id, "8");
        assert_eq!(
            dist.cpe.as_deref(),
            Some("cpe:/o:redhat:enterprise_linux:8")
        );
    }

    #[test]
    fn test_detect_centos_as_rhel() {
        let fs = build_tar(&[(
            "etc/os-release",
            "ID=\"centos\"\nVERSION_ID=\"7\"\n",
        )]);
        let dist = RedhatDistScanner.scan(&fs).unwrap().unwrap();
        assert_eq!(dist.version_id, "7");
    }

    #[test]
    fn test_redhat_release_fallback() {
        let fs = build_tar(&[(
            "etc/redhat-release",
            "CentOS Linux release 7.9.2009 (Core)\n",
        )]);
        let dist = RedhatDistScanner.scan(&fs).unwrap().unwrap();
        assert_eq!(dist.version_id, "7");
    }

    #[test]
    fn test_other_distros_are_not_claimed() {
        let fs = build_tar(&[("etc/os-release", "ID=alpine\nVERSION_ID=3.19.0\n")]);
        assert!(RedhatDistScanner.scan(&fs).unwrap().is_none());
    }
}
