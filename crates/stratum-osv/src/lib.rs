//! OSV updaters
//!
//! OSV publishes per-ecosystem snapshots as a zip of advisory JSON
//! files. One updater per configured ecosystem fetches `all.zip`
//! conditionally and normalizes the advisories for the language
//! matchers.
//!
//! Data source: <https://osv-vulnerabilities.storage.googleapis.com/>

use std::io::{Cursor, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use stratum_core::{CancelToken, Fingerprint, Package, Repository, Severity, Vulnerability};
use stratum_updater::{fetch_conditional, FetchError, Updater, UpdaterConfigs, UpdaterFactory};

const OSV_BASE: &str = "https://osv-vulnerabilities.storage.googleapis.com";

/// Ecosystems fetched when the factory is not configured otherwise
fn default_ecosystems() -> Vec<String> {
    ["PyPI", "Maven", "crates.io"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

// OSV wire format, the fields this engine consumes
#[derive(Debug, Deserialize)]
struct OsvEntry {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    affected: Vec<OsvAffected>,
    #[serde(default)]
    references: Vec<OsvReference>,
    #[serde(default)]
    severity: Vec<OsvSeverity>,
    #[serde(default)]
    database_specific: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OsvAffected {
    package: OsvPackage,
    #[serde(default)]
    ranges: Vec<OsvRange>,
}

#[derive(Debug, Deserialize)]
struct OsvPackage {
    name: String,
    ecosystem: String,
}

#[derive(Debug, Deserialize)]
struct OsvRange {
    #[serde(rename = "type")]
    range_type: String,
    #[serde(default)]
    events: Vec<OsvEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct OsvEvent {
    #[serde(default)]
    #[allow(dead_code)]
    introduced: Option<String>,
    #[serde(default)]
    fixed: Option<String>,
    #[serde(default)]
    last_affected: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsvReference {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct OsvSeverity {
    #[serde(rename = "type")]
    kind: String,
    score: String,
}

/// One ecosystem's snapshot updater
pub struct OsvUpdater {
    base: String,
    ecosystem: String,
    agent: ureq::Agent,
}

impl OsvUpdater {
    pub fn new(base: &str, ecosystem: &str, agent: ureq::Agent) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            ecosystem: ecosystem.to_string(),
            agent,
        }
    }

    fn url(&self) -> String {
        format!("{}/{}/all.zip", self.base, self.ecosystem)
    }

    /// The repository records from this ecosystem carry
    fn repository(&self) -> Repository {
        let name = match self.ecosystem.as_str() {
            "PyPI" => "pypi",
            "Maven" => "maven",
            other => other,
        };
        Repository {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn package_name(&self, raw: &str) -> String {
        match self.ecosystem.as_str() {
            "PyPI" => stratum_python::normalize_name(raw),
            _ => raw.to_string(),
        }
    }

    fn convert(&self, entry: OsvEntry, out: &mut Vec<Vulnerability>) {
        let links = entry
            .references
            .iter()
            .map(|r| r.url.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let severity_vector = entry
            .severity
            .iter()
            .find(|s| s.kind.starts_with("CVSS"))
            .map(|s| s.score.clone());
        let normalized: Severity = entry
            .database_specific
            .as_ref()
            .and_then(|d| d.get("severity"))
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .parse()
            .unwrap_or_default();
        let description = entry
            .summary
            .clone()
            .or_else(|| entry.details.clone())
            .unwrap_or_default();

        for affected in entry.affected {
            if affected.package.ecosystem != self.ecosystem {
                continue;
            }
            let name = self.package_name(&affected.package.name);
            for range in affected.ranges {
                // GIT ranges carry commit hashes, which have no version
                // ordering to match against
                if range.range_type == "GIT" {
                    continue;
                }
                let fixed_in = range
                    .events
                    .iter()
                    .find_map(|e| e.fixed.clone())
                    // last_affected bounds are closed; the matcher's
                    // strict less-than needs the next version, which the
                    // feed does not name, so the whole range is taken
                    .or_else(|| {
                        range
                            .events
                            .iter()
                            .any(|e| e.last_affected.is_some())
                            .then(String::new)
                    })
                    .unwrap_or_default();
                out.push(Vulnerability {
                    updater: self.name(),
                    name: entry.id.clone(),
                    description: description.clone(),
                    links: links.clone(),
                    severity: severity_vector.clone().unwrap_or_default(),
                    normalized_severity: normalized,
                    package: Some(Package {
                        name: name.clone(),
                        ..Default::default()
                    }),
                    repo: Some(self.repository()),
                    fixed_in_version: fixed_in,
                    ..Default::default()
                });
            }
        }
    }
}

impl Updater for OsvUpdater {
    fn name(&self) -> String {
        format!("osv-{}-updater", self.ecosystem.to_ascii_lowercase())
    }

    fn fetch(
        &self,
        cancel: &CancelToken,
        prev: Option<&Fingerprint>,
    ) -> std::result::Result<(Box<dyn Read + Send>, Fingerprint), FetchError> {
        fetch_conditional(&self.agent, cancel, &self.url(), prev)
    }

    fn parse(
        &self,
        cancel: &CancelToken,
        mut rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<Vulnerability>> {
        let mut blob = Vec::new();
        rdr.read_to_end(&mut blob).context("failed to read snapshot")?;
        cancel.checkpoint()?;
        let mut archive =
            zip::ZipArchive::new(Cursor::new(blob)).context("snapshot is not a zip")?;

        let mut out = Vec::new();
        let mut skipped = 0usize;
        for i in 0..archive.len() {
            if i % 512 == 0 {
                cancel.checkpoint()?;
            }
            let mut file = archive.by_index(i).context("corrupt snapshot entry")?;
            if !file.name().ends_with(".json") {
                continue;
            }
            let mut raw = String::new();
            if file.read_to_string(&mut raw).is_err() {
                skipped += 1;
                continue;
            }
            match serde_json::from_str::<OsvEntry>(&raw) {
                Ok(entry) => self.convert(entry, &mut out),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, updater = %self.name(), "advisories skipped as unparsable");
        }
        debug!(updater = %self.name(), vulns = out.len(), "snapshot parsed");
        Ok(out)
    }
}

/// Config blob for [`OsvFactory`]
#[derive(Debug, Default, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ecosystems: Vec<String>,
}

/// Emits one updater per configured ecosystem
pub struct OsvFactory {
    base: String,
    ecosystems: Vec<String>,
    agent: ureq::Agent,
}

impl Default for OsvFactory {
    fn default() -> Self {
        Self {
            base: OSV_BASE.to_string(),
            ecosystems: default_ecosystems(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl OsvFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdaterFactory for OsvFactory {
    fn name(&self) -> &'static str {
        "osv"
    }

    fn configure(&mut self, cfg: &UpdaterConfigs, client: &ureq::Agent) -> Result<()> {
        let cfg: FactoryConfig = cfg.unmarshal(self.name())?;
        if let Some(url) = cfg.url {
            self.base = url.trim_end_matches('/').to_string();
        }
        if !cfg.ecosystems.is_empty() {
            self.ecosystems = cfg.ecosystems;
        }
        self.agent = client.clone();
        Ok(())
    }

    fn updaters(&self, _cancel: &CancelToken) -> Result<Vec<Arc<dyn Updater>>> {
        Ok(self
            .ecosystems
            .iter()
            .map(|eco| {
                Arc::new(OsvUpdater::new(&self.base, eco, self.agent.clone()))
                    as Arc<dyn Updater>
            })
            .collect())
    }
}
