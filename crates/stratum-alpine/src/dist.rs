//! Alpine distribution detection

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use tracing::debug;

use stratum_core::Distribution;
use stratum_indexer::{osrelease, DistributionScanner};
use stratum_tarfs::TarFs;

const OS_RELEASE: &str = "etc/os-release";
const OS_RELEASE_ALT: &str = "usr/lib/os-release";
const ALPINE_RELEASE: &str = "etc/alpine-release";

lazy_static! {
    // process-wide interned distributions, one per (major, minor)
    static ref RELEASES: Mutex<HashMap<(u32, u32), Distribution>> = Mutex::new(HashMap::new());
}

/// Interned distribution value for an Alpine branch
pub fn release(major: u32, minor: u32) -> Distribution {
    let mut map = RELEASES.lock().expect("alpine release map poisoned");
    map.entry((major, minor))
        .or_insert_with(|| {
            let branch = format!("{}.{}", major, minor);
            Distribution {
                did: "alpine".to_string(),
                name: "Alpine Linux".to_string(),
                version: branch.clone(),
                version_id: branch.clone(),
                pretty_name: format!("Alpine Linux v{}", branch),
                ..Default::default()
            }
        })
        .clone()
}

/// Parse `major.minor` out of a version string like `3.10.3`
fn branch_of(version: &str) -> Option<(u32, u32)> {
    let mut it = version.trim().trim_start_matches('v').split('.');
    let major = it.next()?.parse().ok()?;
    let minor = it.next()?.parse().ok()?;
    Some((major, minor))
}

/// Detects Alpine from os-release, falling back to etc/alpine-release
#[derive(Debug, Default)]
pub struct DistScanner;

impl DistributionScanner for DistScanner {
    fn name(&self) -> &'static str {
        "alpine-dist"
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
            if kv.get("ID").map(String::as_str) != Some("alpine") {
                return Ok(None);
            }
            let Some((major, minor)) = kv.get("VERSION_ID").and_then(|v| branch_of(v)) else {
                return Ok(None);
            };
            debug!(major, minor, "alpine detected via os-release");
            return Ok(Some(release(major, minor)));
        }

        if layer.exists(ALPINE_RELEASE) {
            let data = layer
                .read_file(ALPINE_RELEASE)
                .context("failed to read etc/alpine-release")?;
            let text = String::from_utf8_lossy(&data);
            if let Some((major, minor)) = branch_of(text.trim()) {
                debug!(major, minor, "alpine detected via alpine-release");
                return Ok(Some(release(major, minor)));
            }
        }
        Ok(None)
    }
}
