//! Updater contracts and the update manager
//!
//! An updater fetches one upstream feed (conditionally, via an opaque
//! fingerprint) and parses it into normalized records. A factory
//! enumerates the concrete updaters for a feed family, often one per
//! supported release. The manager schedules factories, bounds
//! parallelism, takes a cluster-wide advisory lock per updater, and
//! persists results through the store.

mod fetch;
mod manager;

pub use fetch::fetch_conditional;
pub use manager::{ManagerConfig, UpdateManager};

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;

use stratum_core::{CancelToken, Cancelled, EnrichmentRecord, Fingerprint, UpdateKind, Vulnerability};

/// Errors out of [`Updater::fetch`]
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The upstream indicated nothing changed since the fingerprint;
    /// nothing to parse, nothing to store
    #[error("feed unchanged since last fetch")]
    Unchanged,
    #[error("fetch cancelled")]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One feed instance: fetch then parse
pub trait Updater: Send + Sync {
    /// Stable, globally-unique identifier for this feed instance
    fn name(&self) -> String;

    /// Conditionally fetch the feed
    ///
    /// `prev` is the fingerprint recorded by the last successful run; the
    /// updater must treat it as opaque apart from having produced it. A
    /// server-side "no change" maps to [`FetchError::Unchanged`].
    fn fetch(
        &self,
        cancel: &CancelToken,
        prev: Option<&Fingerprint>,
    ) -> Result<(Box<dyn Read + Send>, Fingerprint), FetchError>;

    /// What this updater yields; decides which parse method runs
    fn kind(&self) -> UpdateKind {
        UpdateKind::Vulnerability
    }

    /// Consume the fetched stream into vulnerabilities with this
    /// updater's name pre-filled
    fn parse(
        &self,
        cancel: &CancelToken,
        rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<Vulnerability>>;

    /// Enrichment-kind updaters override this instead of [`Updater::parse`]
    fn parse_enrichments(
        &self,
        _cancel: &CancelToken,
        _rdr: Box<dyn Read + Send>,
    ) -> Result<Vec<EnrichmentRecord>> {
        anyhow::bail!("{} is not an enrichment updater", self.name())
    }
}

/// Per-factory configuration blobs, keyed by factory name
///
/// The outer caller hands every factory the same bag; each factory
/// deserializes its own entry into its config type.
#[derive(Debug, Clone, Default)]
pub struct UpdaterConfigs {
    blobs: HashMap<String, serde_json::Value>,
}

impl UpdaterConfigs {
    pub fn new(blobs: HashMap<String, serde_json::Value>) -> Self {
        Self { blobs }
    }

    /// Deserialize the blob for `name`, or the type's default when absent
    pub fn unmarshal<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        match self.blobs.get(name) {
            None => Ok(T::default()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| anyhow::anyhow!("bad configuration for {}: {}", name, e)),
        }
    }
}

/// Enumerates the concrete updaters for one feed family
pub trait UpdaterFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inject feed-specific knobs and the HTTP client used for fetches
    fn configure(&mut self, _cfg: &UpdaterConfigs, _client: &ureq::Agent) -> Result<()> {
        Ok(())
    }

    /// Materialize the updater set, possibly probing an upstream
    /// capability endpoint for supported releases
    fn updaters(&self, cancel: &CancelToken) -> Result<Vec<Arc<dyn Updater>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct FakeConfig {
        #[serde(default)]
        url: String,
        #[serde(default)]
        releases: Vec<String>,
    }

    #[test]
    fn test_unmarshal_present_and_absent() {
        let mut blobs = HashMap::new();
        blobs.insert(
            "alpine".to_string(),
            serde_json::json!({"url": "https://mirror.test/secdb", "releases": ["v3.10"]}),
        );
        let cfgs = UpdaterConfigs::new(blobs);

        let got: FakeConfig = cfgs.unmarshal("alpine").unwrap();
        assert_eq!(got.url, "https://mirror.test/secdb");
        assert_eq!(got.releases, vec!["v3.10"]);

        let missing: FakeConfig = cfgs.unmarshal("debian").unwrap();
        assert_eq!(missing, FakeConfig::default());
    }

    #[test]
    fn test_unmarshal_rejects_mistyped_blob() {
        let mut blobs = HashMap::new();
        blobs.insert("alpine".to_string(), serde_json::json!({"releases": 3}));
        let cfgs = UpdaterConfigs::new(blobs);
        assert!(cfgs.unmarshal::<FakeConfig>("alpine").is_err());
    }
}
