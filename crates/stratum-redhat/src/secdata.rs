//! Red Hat Security Data API updater
//!
//! One updater covers the family: the API's CVE listing is paginated
//! and carries the fixed packages as NEVRA strings, whose `.elN` suffix
//! pins the release a fix belongs to.

use std::io::{Cursor, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use stratum_core::{CancelToken, Fingerprint, Package, Severity, Vulnerability};
use stratum_updater::{fetch_conditional, FetchError, Updater, UpdaterConfigs, UpdaterFactory};

use crate::dist;

const SECDATA_BASE: &str = "https://access.redhat.com/hydra/rest/securitydata";
const PER_PAGE: usize = 1000;
const MAX_PAGES: usize = 1000;

lazy_static! {
    static ref EL_RE: Regex = Regex::new(r"\.el(\d+)").expect("static regex");
}

#[derive(Debug, Deserialize)]
struct CveEntry {
    #[serde(rename = "CVE")]
    cve: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    bugzilla_description: Option<String>,
    #[serde(default)]
    resource_url: Option<String>,
    #[serde(default)]
    affected_packages: Vec<String>,
}

/// The family-wide updater
pub struct RedhatUpdater {
    base: String,
    agent: ureq::Agent,
}

impl RedhatUpdater {
    pub fn new(base: &str, agent: ureq::Agent) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn page_url(&self, page: usize) -> String {
        format!("{}/cve.json?per_page={}&page={}", self.base, PER_PAGE, page)
    }
}

impl Updater for RedhatUpdater {
    fn name(&self) -> String {
        "rhel-secdata-updater".to_string()
    }

    /// Walk every page, concatenating the entries into one JSON array
    ///
    /// Only the first page is fetched conditionally; when it reports 304
    /// the rest of the listing cannot have changed either.
    fn fetch(
        &self,
        cancel: &CancelToken,
        prev: Option<&Fingerprint>,
    ) -> std::result::Result<(Box<dyn Read + Send>, Fingerprint), FetchError> {
        let (mut first, fingerprint) =
            fetch_conditional(&self.agent, cancel, &self.page_url(1), prev)?;
        let mut entries: Vec<serde_json::Value> = {
            let mut raw = String::new();
            first
                .read_to_string(&mut raw)
                .context("failed to read page 1")?;
            serde_json::from_str(&raw).context("failed to parse page 1")?
        };

        let mut page = 2;
        while page <= MAX_PAGES {
            cancel.checkpoint().map_err(FetchError::Cancelled)?;
            if entries.len() < (page - 1) * PER_PAGE {
                // the previous page came back short; the listing is done
                break;
            }
            let (mut rdr, _) = fetch_conditional(&self.agent, cancel, &self.page_url(page), None)?;
            let mut raw = String::new();
            rdr.read_to_string(&mut raw)
                .with_context(|| format!("failed to read page {}", page))?;
            let batch: Vec<serde_json::Value> =
                serde_json::from_str(&raw).with_context(|| format!("failed to parse page {}", page))?;
            if batch.is_empty() {
                break;
            }
            entries.extend(batch);
            page += 1;
        }

        let body = serde_json::to_vec(&entries)
            .context("failed to serialize collected pages")?;
        Ok((Box::new(Cursor::new(body)), fingerprint))
    }

    fn parse(
        &self,
        cancel: &CancelToken,
        mut rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<Vulnerability>> {
        let mut raw = String::new();
        rdr.read_to_string(&mut raw)
            .context("failed to read CVE listing")?;
        cancel.checkpoint()?;
        let entries: Vec<CveEntry> =
            serde_json::from_str(&raw).context("failed to parse CVE listing")?;

        let mut out = Vec::new();
        for entry in entries {
            let severity: Severity = entry
                .severity
                .as_deref()
                .unwrap_or("")
                .parse()
                .unwrap_or_default();
            for nevra in &entry.affected_packages {
                let Some((pkg, evr)) = split_nevra(nevra) else {
                    continue;
                };
                // the dist release is pinned by the .elN tag in the fix
                let Some(major) = EL_RE
                    .captures(&evr)
                    .and_then(|c| c[1].parse::<u32>().ok())
                else {
                    continue;
                };
                out.push(Vulnerability {
                    updater: self.name(),
                    name: entry.cve.clone(),
                    description: entry.bugzilla_description.clone().unwrap_or_default(),
                    links: entry
                        .resource_url
                        .clone()
                        .unwrap_or_else(|| {
                            format!("https://access.redhat.com/security/cve/{}", entry.cve)
                        }),
                    severity: entry.severity.clone().unwrap_or_default(),
                    normalized_severity: severity,
                    package: Some(Package {
                        name: pkg,
                        ..Default::default()
                    }),
                    dist: Some(dist::release(major)),
                    fixed_in_version: evr,
                    ..Default::default()
                });
            }
        }
        debug!(vulns = out.len(), "CVE listing parsed");
        Ok(out)
    }
}

/// Split a NEVRA like `openssl-1:1.0.2k-25.el7_9` into name and EVR
fn split_nevra(nevra: &str) -> Option<(String, String)> {
    // name-version-release: version starts after the second dash from
    // the right
    let (rest, release) = nevra.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() || release.is_empty() {
        return None;
    }
    Some((name.to_string(), format!("{}-{}", version, release)))
}

/// Config blob for [`RedhatFactory`]
#[derive(Debug, Default, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Emits the family-wide updater
pub struct RedhatFactory {
    base: String,
    agent: ureq::Agent,
}

impl Default for RedhatFactory {
    fn default() -> Self {
        Self {
            base: SECDATA_BASE.to_string(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl RedhatFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdaterFactory for RedhatFactory {
    fn name(&self) -> &'static str {
        "redhat"
    }

    fn configure(&mut self, cfg: &UpdaterConfigs, client: &ureq::Agent) -> Result<()> {
        let cfg: FactoryConfig = cfg.unmarshal(self.name())?;
        if let Some(url) = cfg.url {
            self.base = url.trim_end_matches('/').to_string();
        }
        self.agent = client.clone();
        Ok(())
    }

    fn updaters(&self, _cancel: &CancelToken) -> Result<Vec<Arc<dyn Updater>>> {
        Ok(vec![Arc::new(RedhatUpdater::new(
            &self.base,
            self.agent.clone(),
        ))])
    }
}
