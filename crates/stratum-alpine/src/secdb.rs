//! secdb updaters and their factory

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use stratum_core::{CancelToken, Fingerprint, Severity, Vulnerability};
use stratum_updater::{fetch_conditional, FetchError, Updater, UpdaterConfigs, UpdaterFactory};

use crate::dist;

const SECDB_BASE: &str = "https://secdb.alpinelinux.org";
const REPOSITORIES: [&str; 2] = ["main", "community"];

/// Branches assumed live when the index probe fails
fn fallback_branches() -> Vec<String> {
    ["v3.16", "v3.17", "v3.18", "v3.19", "v3.20"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

// secdb wire format
#[derive(Debug, Deserialize)]
struct SecdbFile {
    #[serde(default)]
    packages: Vec<SecdbPackage>,
}

#[derive(Debug, Deserialize)]
struct SecdbPackage {
    pkg: SecdbPkgInfo,
}

#[derive(Debug, Deserialize)]
struct SecdbPkgInfo {
    name: String,
    #[serde(default)]
    secfixes: std::collections::HashMap<String, Vec<String>>,
}

/// One secdb feed: a branch × repository pair
pub struct SecdbUpdater {
    base: String,
    branch: String,
    repository: String,
    agent: ureq::Agent,
}

impl SecdbUpdater {
    pub fn new(base: &str, branch: &str, repository: &str, agent: ureq::Agent) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            branch: branch.to_string(),
            repository: repository.to_string(),
            agent,
        }
    }

    fn url(&self) -> String {
        format!("{}/{}/{}.json", self.base, self.branch, self.repository)
    }

    fn dist(&self) -> Option<stratum_core::Distribution> {
        let branch = self.branch.trim_start_matches('v');
        let mut it = branch.split('.');
        let major: u32 = it.next()?.parse().ok()?;
        let minor: u32 = it.next()?.parse().ok()?;
        Some(dist::release(major, minor))
    }
}

impl Updater for SecdbUpdater {
    fn name(&self) -> String {
        format!("alpine-{}-{}-updater", self.branch, self.repository)
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
        let mut raw = String::new();
        rdr.read_to_string(&mut raw).context("failed to read secdb")?;
        cancel.checkpoint()?;
        let file: SecdbFile = serde_json::from_str(&raw).context("failed to parse secdb")?;

        let dist = self.dist();
        let mut out = Vec::new();
        for pkg in file.packages {
            for (fixed_in, cves) in pkg.pkg.secfixes {
                for cve in cves {
                    // secfix entries mix CVE ids with advisory cross
                    // references like XSA or ZBX identifiers
                    if !cve.starts_with("CVE-") {
                        continue;
                    }
                    out.push(Vulnerability {
                        updater: self.name(),
                        name: cve.clone(),
                        description: format!(
                            "{} fixed in {} on Alpine {}",
                            cve, fixed_in, self.branch
                        ),
                        links: format!("https://security.alpinelinux.org/vuln/{}", cve),
                        severity: String::new(),
                        normalized_severity: Severity::Unknown,
                        package: Some(stratum_core::Package {
                            name: pkg.pkg.name.clone(),
                            ..Default::default()
                        }),
                        dist: dist.clone(),
                        fixed_in_version: fixed_in.clone(),
                        ..Default::default()
                    });
                }
            }
        }
        debug!(updater = %self.name(), vulns = out.len(), "secdb parsed");
        Ok(out)
    }
}

/// Config blob for [`AlpineFactory`]
#[derive(Debug, Default, Deserialize)]
pub struct FactoryConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub branches: Vec<String>,
}

/// Emits one updater per live branch × repository
pub struct AlpineFactory {
    base: String,
    branches: Vec<String>,
    agent: ureq::Agent,
}

impl Default for AlpineFactory {
    fn default() -> Self {
        Self {
            base: SECDB_BASE.to_string(),
            branches: Vec::new(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl AlpineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe the secdb index page for branch directories
    fn probe_branches(&self, cancel: &CancelToken) -> Result<Vec<String>> {
        cancel.checkpoint()?;
        let mut resp = self
            .agent
            .get(&self.base)
            .call()
            .with_context(|| format!("failed to probe {}", self.base))?;
        let body = resp
            .body_mut()
            .read_to_string()
            .context("failed to read secdb index")?;
        let re = Regex::new(r#"href="(v\d+\.\d+)/""#).expect("static regex");
        let mut branches: Vec<String> = re
            .captures_iter(&body)
            .map(|c| c[1].to_string())
            .collect();
        branches.sort();
        branches.dedup();
        anyhow::ensure!(!branches.is_empty(), "no branches in secdb index");
        Ok(branches)
    }
}

impl UpdaterFactory for AlpineFactory {
    fn name(&self) -> &'static str {
        "alpine"
    }

    fn configure(&mut self, cfg: &UpdaterConfigs, client: &ureq::Agent) -> Result<()> {
        let cfg: FactoryConfig = cfg.unmarshal(self.name())?;
        if let Some(url) = cfg.url {
            self.base = url.trim_end_matches('/').to_string();
        }
        self.branches = cfg.branches;
        self.agent = client.clone();
        Ok(())
    }

    fn updaters(&self, cancel: &CancelToken) -> Result<Vec<Arc<dyn Updater>>> {
        let branches = if !self.branches.is_empty() {
            self.branches.clone()
        } else {
            match self.probe_branches(cancel) {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = format!("{:#}", e).as_str(), "branch probe failed, using fallback list");
                    fallback_branches()
                }
            }
        };
        let mut out: Vec<Arc<dyn Updater>> = Vec::new();
        for branch in &branches {
            for repo in REPOSITORIES {
                out.push(Arc::new(SecdbUpdater::new(
                    &self.base,
                    branch,
                    repo,
                    self.agent.clone(),
                )));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SECDB: &str = r#"{
        "apkurl": "{{urlprefix}}/{{distroversion}}/{{reponame}}/{{arch}}/{{pkg.name}}-{{pkg.ver}}.apk",
        "archs": ["x86_64"],
        "reponame": "main",
        "urlprefix": "https://dl-cdn.alpinelinux.org/alpine",
        "distroversion": "v3.10",
        "packages": [
            {"pkg": {"name": "botan", "secfixes": {"2.9.0-r0": ["CVE-2018-20187"]}}},
            {"pkg": {"name": "openssl", "secfixes": {
                "1.1.1d-r2": ["CVE-2019-1551"],
                "0": ["CVE-2019-0000", "XSA-999"]
            }}}
        ]
    }"#;

    fn updater() -> SecdbUpdater {
        SecdbUpdater::new(SECDB_BASE, "v3.10", "main", ureq::Agent::new_with_defaults())
    }

    #[test]
    fn test_parse_secdb() {
        let vulns = updater()
            .parse(&CancelToken::new(), Box::new(Cursor::new(SECDB)))
            .unwrap();
        // XSA cross-reference is dropped, three CVEs survive
        assert_eq!(vulns.len(), 3);

        let botan = vulns.iter().find(|v| v.name == "CVE-2018-20187").unwrap();
        assert_eq!(botan.package.as_ref().unwrap().name, "botan");
        assert_eq!(botan.fixed_in_version, "2.9.0-r0");
        assert_eq!(botan.dist.as_ref().unwrap().version_id, "3.10");
        assert_eq!(botan.updater, "alpine-v3.10-main-updater");

        // the "0" sentinel rides through verbatim for the matcher
        let pending = vulns.iter().find(|v| v.name == "CVE-2019-0000").unwrap();
        assert_eq!(pending.fixed_in_version, "0");
    }

    #[test]
    fn test_updater_names_are_unique_per_branch_repo() {
        let a = SecdbUpdater::new(SECDB_BASE, "v3.10", "main", ureq::Agent::new_with_defaults());
        let b = SecdbUpdater::new(
            SECDB_BASE,
            "v3.10",
            "community",
            ureq::Agent::new_with_defaults(),
        );
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_configured_branches_skip_probe() {
        let mut factory = AlpineFactory::new();
        let mut blobs = std::collections::HashMap::new();
        blobs.insert(
            "alpine".to_string(),
            serde_json::json!({"branches": ["v3.10"]}),
        );
        factory
            .configure(
                &UpdaterConfigs::new(blobs),
                &ureq::Agent::new_with_defaults(),
            )
            .unwrap();
        let updaters = factory.updaters(&CancelToken::new()).unwrap();
        let names: Vec<_> = updaters.iter().map(|u| u.name()).collect();
        assert_eq!(
            names,
            vec![
                "alpine-v3.10-main-updater",
                "alpine-v3.10-community-updater"
            ]
        );
    }
}
