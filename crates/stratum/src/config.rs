//! Configuration file loading
//!
//! A single JSON blob covers the update manager and matcher wiring;
//! every field has a default so an absent file means stock behavior.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Updater factories to run; empty means all
    #[serde(default)]
    pub updater_sets: Vec<String>,
    /// Per-factory configuration blobs, keyed by factory name
    #[serde(default)]
    pub updater_configs: HashMap<String, serde_json::Value>,
    /// Matchers to use; empty means all
    #[serde(default)]
    pub matcher_names: Vec<String>,
    /// Scheduler interval for watch mode, e.g. "30m"
    #[serde(default, with = "humantime_serde")]
    pub update_interval: Option<Duration>,
    /// Parallelism bound for one update pass
    #[serde(default)]
    pub update_workers: Option<usize>,
    /// Update operations retained per updater
    #[serde(default)]
    pub update_retention: Option<usize>,
    #[serde(default)]
    pub disable_background_updates: bool,
    /// Timeout applied to every feed fetch, e.g. "5m"
    #[serde(default, with = "humantime_serde")]
    pub http_timeout: Option<Duration>,
}

pub fn load(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("bad configuration in {}", path.display()))
}
