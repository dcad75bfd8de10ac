//! Debian security tracker updater
//!
//! One updater covers every release: the tracker publishes a single JSON
//! dump keyed by source package, CVE, and release codename.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use stratum_core::{CancelToken, Fingerprint, Package, Severity, Vulnerability};
use stratum_updater::{fetch_conditional, FetchError, Updater, UpdaterConfigs, UpdaterFactory};

use crate::dist;

const TRACKER_URL: &str = "https://security-tracker.debian.org/tracker/data/json";

#[derive(Debug, Deserialize)]
struct TrackerCve {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    releases: HashMap<String, TrackerRelease>,
}

#[derive(Debug, Deserialize)]
struct TrackerRelease {
    status: String,
    #[serde(default)]
    fixed_version: Option<String>,
    #[serde(default)]
    urgency: Option<String>,
}

/// The whole-tracker updater
pub struct DebianUpdater {
    url: String,
    agent: ureq::Agent,
}

impl DebianUpdater {
    pub fn new(url: &str, agent: ureq::Agent) -> Self {
        Self {
            url: url.to_string(),
            agent,
        }
    }
}

impl Updater for DebianUpdater {
    fn name(&self) -> String {
        "debian-tracker-updater".to_string()
    }

    fn fetch(
        &self,
        cancel: &CancelToken,
        prev: Option<&Fingerprint>,
    ) -> std::result::Result<(Box<dyn Read + Send>, Fingerprint), FetchError> {
        fetch_conditional(&self.agent, cancel, &self.url, prev)
    }

    fn parse(
        &self,
        cancel: &CancelToken,
        mut rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<Vulnerability>> {
        let mut raw = String::new();
        rdr.read_to_string(&mut raw)
            .context("failed to read tracker dump")?;
        cancel.checkpoint()?;
        let file: HashMap<String, HashMap<String, TrackerCve>> =
            serde_json::from_str(&raw).context("failed to parse tracker dump")?;

        let mut out = Vec::new();
        for (src_pkg, cves) in file {
            for (cve, data) in cves {
                for (codename, release) in &data.releases {
                    // releases outside the supported map (sid, experimental)
                    // have no stable version to pin a match to
                    let Some(d) = dist::debian_release(codename) else {
                        continue;
                    };
                    let fixed_in = match release.status.as_str() {
                        "resolved" => release.fixed_version.clone().unwrap_or_default(),
                        // open and undetermined: the whole range is affected
                        _ => String::new(),
                    };
                    let severity: Severity = release
                        .urgency
                        .as_deref()
                        .unwrap_or("")
                        .split_whitespace()
                        .next()
                        .unwrap_or("")
                        .parse()
                        .unwrap_or_default();
                    out.push(Vulnerability {
                        updater: self.name(),
                        name: cve.clone(),
                        description: data.description.clone().unwrap_or_default(),
                        links: format!(
                            "https://security-tracker.debian.org/tracker/{}",
                            cve
                        ),
                        severity: release.urgency.clone().unwrap_or_default(),
                        normalized_severity: severity,
                        package: Some(Package {
                            name: src_pkg.clone(),
                            ..Default::default()
                        }),
                        dist: Some(d),
                        fixed_in_version: fixed_in,
                        ..Default::default()
                    });
                }
            }
        }
        debug!(vulns = out.len(), "tracker dump parsed");
        Ok(out)
    }
}

/// Config blob for [`DebianFactory`]
#[derive(Debug, Default, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Emits the single tracker updater
pub struct DebianFactory {
    url: String,
    agent: ureq::Agent,
}

impl Default for DebianFactory {
    fn default() -> Self {
        Self {
            url: TRACKER_URL.to_string(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl DebianFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdaterFactory for DebianFactory {
    fn name(&self) -> &'static str {
        "debian"
    }

    fn configure(&mut self, cfg: &UpdaterConfigs, client: &ureq::Agent) -> Result<()> {
        let cfg: FactoryConfig = cfg.unmarshal(self.name())?;
        if let Some(url) = cfg.url {
            self.url = url;
        }
        self.agent = client.clone();
        Ok(())
    }

    fn updaters(&self, _cancel: &CancelToken) -> Result<Vec<Arc<dyn Updater>>> {
        Ok(vec![Arc::new(DebianUpdater::new(
            &self.url,
            self.agent.clone(),
        ))])
    }
}
