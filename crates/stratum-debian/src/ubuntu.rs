//! Ubuntu OVAL updaters and their factory
//!
//! Canonical publishes one bzip2-compressed OVAL document per series.
//! Definitions carry the CVE in their metadata and encode per-package
//! fix state in criterion comments, so the parse is a single pull pass
//! that never materializes the document tree.

use std::io::{BufReader, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use stratum_core::{CancelToken, Fingerprint, Package, Severity, Vulnerability};
use stratum_updater::{fetch_conditional, FetchError, Updater, UpdaterConfigs, UpdaterFactory};

use crate::dist;

const OVAL_BASE: &str = "https://security-metadata.canonical.com/oval";
const SERIES_API: &str = "https://api.launchpad.net/devel/ubuntu/series";

lazy_static! {
    static ref FIXED_RE: Regex = Regex::new(
        r"^(\S+) package in \S+ (?:was vulnerable but )?has been fixed \(note: '([^']+)'\)"
    )
    .expect("static regex");
    static ref UNFIXED_RE: Regex =
        Regex::new(r"^(\S+) package in \S+ is affected and (?:needs fixing|may need fixing)")
            .expect("static regex");
}

/// Series assumed live when the Launchpad probe fails
fn fallback_series() -> Vec<String> {
    ["bionic", "focal", "jammy", "noble"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// One series' OVAL feed
pub struct UbuntuUpdater {
    base: String,
    codename: String,
    agent: ureq::Agent,
}

impl UbuntuUpdater {
    pub fn new(base: &str, codename: &str, agent: ureq::Agent) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            codename: codename.to_string(),
            agent,
        }
    }

    fn url(&self) -> String {
        format!("{}/com.ubuntu.{}.cve.oval.xml.bz2", self.base, self.codename)
    }
}

#[derive(Default)]
struct Definition {
    cve: Option<String>,
    severity: String,
    description: String,
    // (package, fixed-in) pairs; empty fixed-in means unfixed
    affected: Vec<(String, String)>,
}

enum TextTarget {
    None,
    Title,
    Severity,
    Description,
}

impl Updater for UbuntuUpdater {
    fn name(&self) -> String {
        format!("ubuntu-{}-updater", self.codename)
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
        rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<Vulnerability>> {
        let mut reader = Reader::from_reader(BufReader::new(rdr));
        let mut buf = Vec::new();
        let mut out = Vec::new();
        let mut current: Option<Definition> = None;
        let mut target = TextTarget::None;
        let mut events: usize = 0;

        loop {
            events += 1;
            if events % 4096 == 0 {
                cancel.checkpoint()?;
            }
            match reader
                .read_event_into(&mut buf)
                .context("malformed OVAL document")?
            {
                Event::Start(e) => match e.name().as_ref() {
                    b"definition" => {
                        let class = e
                            .try_get_attribute("class")
                            .context("bad definition attributes")?
                            .map(|a| a.unescape_value().unwrap_or_default().into_owned());
                        if class.as_deref() == Some("vulnerability") {
                            current = Some(Definition::default());
                        }
                    }
                    b"title" if current.is_some() => target = TextTarget::Title,
                    b"severity" if current.is_some() => target = TextTarget::Severity,
                    b"description" if current.is_some() => target = TextTarget::Description,
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(def) = current.as_mut() {
                        let text = t
                            .decode()
                            .ok()
                            .and_then(|s| quick_xml::escape::unescape(&s).ok().map(|u| u.into_owned()))
                            .unwrap_or_default();
                        match target {
                            TextTarget::Title => {
                                if def.cve.is_none() {
                                    def.cve = text
                                        .split_whitespace()
                                        .find(|w| w.starts_with("CVE-"))
                                        .map(str::to_string);
                                }
                            }
                            TextTarget::Severity => def.severity.push_str(text.trim()),
                            TextTarget::Description => def.description.push_str(&text),
                            TextTarget::None => {}
                        }
                    }
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == b"criterion" {
                        if let Some(def) = current.as_mut() {
                            let comment = e
                                .try_get_attribute("comment")
                                .context("bad criterion attributes")?
                                .map(|a| a.unescape_value().unwrap_or_default().into_owned())
                                .unwrap_or_default();
                            if let Some(c) = FIXED_RE.captures(&comment) {
                                def.affected.push((c[1].to_string(), c[2].to_string()));
                            } else if let Some(c) = UNFIXED_RE.captures(&comment) {
                                def.affected.push((c[1].to_string(), String::new()));
                            }
                        }
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"definition" => {
                        if let Some(def) = current.take() {
                            self.emit(def, &mut out);
                        }
                    }
                    b"title" | b"severity" | b"description" => target = TextTarget::None,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        debug!(updater = %self.name(), vulns = out.len(), "OVAL parsed");
        Ok(out)
    }
}

impl UbuntuUpdater {
    fn emit(&self, def: Definition, out: &mut Vec<Vulnerability>) {
        let Some(cve) = def.cve else {
            return;
        };
        let Some(d) = dist::ubuntu_release_by_codename(&self.codename) else {
            return;
        };
        let severity: Severity = def.severity.parse().unwrap_or_default();
        for (pkg, fixed_in) in def.affected {
            out.push(Vulnerability {
                updater: self.name(),
                name: cve.clone(),
                description: def.description.clone(),
                links: format!("https://ubuntu.com/security/{}", cve),
                severity: def.severity.clone(),
                normalized_severity: severity,
                package: Some(Package {
                    name: pkg,
                    ..Default::default()
                }),
                dist: Some(d.clone()),
                fixed_in_version: fixed_in,
                ..Default::default()
            });
        }
    }
}

/// Config blob for [`UbuntuFactory`]
#[derive(Debug, Default, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub releases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesPage {
    #[serde(default)]
    entries: Vec<SeriesEntry>,
}

#[derive(Debug, Deserialize)]
struct SeriesEntry {
    name: String,
    status: String,
}

/// Emits one updater per supported series
///
/// The live series list comes from the Launchpad API; a probe failure
/// falls back to the static list so a Launchpad outage cannot take the
/// whole family offline.
pub struct UbuntuFactory {
    base: String,
    releases: Vec<String>,
    agent: ureq::Agent,
}

impl Default for UbuntuFactory {
    fn default() -> Self {
        Self {
            base: OVAL_BASE.to_string(),
            releases: Vec::new(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl UbuntuFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn probe_series(&self, cancel: &CancelToken) -> Result<Vec<String>> {
        cancel.checkpoint()?;
        let page: SeriesPage = self
            .agent
            .get(SERIES_API)
            .call()
            .context("failed to query Launchpad series")?
            .body_mut()
            .read_json()
            .context("failed to parse Launchpad series")?;
        let series: Vec<String> = page
            .entries
            .into_iter()
            .filter(|e| {
                matches!(
                    e.status.as_str(),
                    "Supported" | "Current Stable Release" | "Active Development"
                )
            })
            .map(|e| e.name)
            .collect();
        anyhow::ensure!(!series.is_empty(), "no supported series reported");
        Ok(series)
    }
}

impl UpdaterFactory for UbuntuFactory {
    fn name(&self) -> &'static str {
        "ubuntu"
    }

    fn configure(&mut self, cfg: &UpdaterConfigs, client: &ureq::Agent) -> Result<()> {
        let cfg: FactoryConfig = cfg.unmarshal(self.name())?;
        if let Some(url) = cfg.url {
            self.base = url.trim_end_matches('/').to_string();
        }
        self.releases = cfg.releases;
        self.agent = client.clone();
        Ok(())
    }

    fn updaters(&self, cancel: &CancelToken) -> Result<Vec<Arc<dyn Updater>>> {
        let series = if !self.releases.is_empty() {
            self.releases.clone()
        } else {
            match self.probe_series(cancel) {
                Ok(found) => found,
                Err(e) => {
                    warn!(
                        error = format!("{:#}", e).as_str(),
                        "series probe failed, using fallback list"
                    );
                    fallback_series()
                }
            }
        };
        Ok(series
            .iter()
            // only series with a known version mapping are matchable
            .filter(|s| dist::ubuntu_release_by_codename(s).is_some())
            .map(|s| {
                Arc::new(UbuntuUpdater::new(&self.base, s, self.agent.clone()))
                    as Arc<dyn Updater>
            })
            .collect())
    }
}
