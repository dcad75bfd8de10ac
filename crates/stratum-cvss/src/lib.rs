//! CVSS enrichment
//!
//! An enrichment-kind updater pulls CVSS vectors from an NVD-style CVE
//! API and indexes them by CVE id; the enricher attaches the stored
//! vectors to every CVE named in a vulnerability report. Scores are
//! consumed, never computed.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use stratum_core::{CancelToken, EnrichmentRecord, Fingerprint, UpdateKind, Vulnerability};
use stratum_matcher::{Enricher, EnrichmentGetter};
use stratum_updater::{fetch_conditional, FetchError, Updater, UpdaterConfigs, UpdaterFactory};

const NVD_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// Shared name binding the updater's operations to the enricher's reads
pub const ENRICHER_NAME: &str = "cvss";

// NVD 2.0 wire format, reduced to the CVSS metrics
#[derive(Debug, Deserialize)]
struct NvdResponse {
    #[serde(default)]
    vulnerabilities: Vec<NvdItem>,
}

#[derive(Debug, Deserialize)]
struct NvdItem {
    cve: NvdCve,
}

#[derive(Debug, Deserialize)]
struct NvdCve {
    id: String,
    #[serde(default)]
    metrics: Option<NvdMetrics>,
}

#[derive(Debug, Default, Deserialize)]
struct NvdMetrics {
    #[serde(rename = "cvssMetricV31", default)]
    v31: Vec<NvdMetric>,
    #[serde(rename = "cvssMetricV30", default)]
    v30: Vec<NvdMetric>,
    #[serde(rename = "cvssMetricV2", default)]
    v2: Vec<NvdMetric>,
}

#[derive(Debug, Deserialize)]
struct NvdMetric {
    #[serde(rename = "cvssData")]
    cvss_data: serde_json::Value,
}

/// Enrichment updater indexing CVSS data by CVE id
pub struct CvssUpdater {
    url: String,
    agent: ureq::Agent,
}

impl CvssUpdater {
    pub fn new(url: &str, agent: ureq::Agent) -> Self {
        Self {
            url: url.to_string(),
            agent,
        }
    }
}

impl Updater for CvssUpdater {
    fn name(&self) -> String {
        ENRICHER_NAME.to_string()
    }

    fn kind(&self) -> UpdateKind {
        UpdateKind::Enrichment
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
        _cancel: &CancelToken,
        _rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<Vulnerability>> {
        anyhow::bail!("cvss is an enrichment updater")
    }

    fn parse_enrichments(
        &self,
        cancel: &CancelToken,
        mut rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<EnrichmentRecord>> {
        let mut raw = String::new();
        rdr.read_to_string(&mut raw)
            .context("failed to read CVE API response")?;
        cancel.checkpoint()?;
        let resp: NvdResponse =
            serde_json::from_str(&raw).context("failed to parse CVE API response")?;

        let mut out = Vec::new();
        for item in resp.vulnerabilities {
            let metrics = item.cve.metrics.unwrap_or_default();
            // newest CVSS revision available wins
            let Some(metric) = metrics
                .v31
                .first()
                .or_else(|| metrics.v30.first())
                .or_else(|| metrics.v2.first())
            else {
                continue;
            };
            out.push(EnrichmentRecord {
                tags: vec![item.cve.id.clone()],
                enrichment: serde_json::json!({
                    "cve": item.cve.id,
                    "cvss": metric.cvss_data,
                }),
            });
        }
        debug!(records = out.len(), "CVSS metrics indexed");
        Ok(out)
    }
}

/// Config blob for [`CvssFactory`]
#[derive(Debug, Default, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// Emits the single enrichment updater
pub struct CvssFactory {
    url: String,
    agent: ureq::Agent,
}

impl Default for CvssFactory {
    fn default() -> Self {
        Self {
            url: NVD_URL.to_string(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl CvssFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdaterFactory for CvssFactory {
    fn name(&self) -> &'static str {
        "cvss"
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
        Ok(vec![Arc::new(CvssUpdater::new(
            &self.url,
            self.agent.clone(),
        ))])
    }
}

/// Attaches stored CVSS vectors to every CVE a report names
#[derive(Debug, Default)]
pub struct CvssEnricher;

impl Enricher for CvssEnricher {
    fn name(&self) -> &'static str {
        ENRICHER_NAME
    }

    fn enrich(
        &self,
        getter: &dyn EnrichmentGetter,
        report: &stratum_core::VulnerabilityReport,
    ) -> Result<Vec<serde_json::Value>> {
        let mut tags: Vec<String> = Vec::new();
        for vuln in report.vulnerabilities.values() {
            if vuln.name.starts_with("CVE-") {
                tags.push(vuln.name.clone());
            }
            // advisories often name the CVE only in their links
            for word in vuln.links.split_whitespace() {
                if let Some(at) = word.find("CVE-") {
                    let id: String = word[at..]
                        .chars()
                        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
                        .collect();
                    tags.push(id);
                }
            }
        }
        tags.sort();
        tags.dedup();
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        getter.get(&tags)
    }
}
