//! Scanner plugins, the registry, and the per-layer scan cache

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use tracing::{debug, warn};

use stratum_core::{CancelToken, Digest, Distribution, Package, Repository};
use stratum_tarfs::TarFs;

/// Scans a layer for installed packages
///
/// `version` is a monotonic version string; bumping it invalidates cached
/// results for the scanner. A scan must be a pure function of the layer's
/// tar contents.
pub trait PackageScanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn scan(&self, layer: &TarFs) -> Result<Vec<Package>>;
}

/// Detects the distribution a layer belongs to
///
/// `Ok(None)` is the non-error "not detected" signal.
pub trait DistributionScanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn scan(&self, layer: &TarFs) -> Result<Option<Distribution>>;
}

/// Discovers package sources configured in a layer
pub trait RepositoryScanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn scan(&self, layer: &TarFs) -> Result<Vec<Repository>>;
}

/// Holds the scanner fleet; mutated only during startup
#[derive(Default)]
pub struct ScannerRegistry {
    package: Vec<Arc<dyn PackageScanner>>,
    distribution: Vec<Arc<dyn DistributionScanner>>,
    repository: Vec<Arc<dyn RepositoryScanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_package(&mut self, s: Arc<dyn PackageScanner>) -> &mut Self {
        self.package.push(s);
        self
    }

    pub fn register_distribution(&mut self, s: Arc<dyn DistributionScanner>) -> &mut Self {
        self.distribution.push(s);
        self
    }

    pub fn register_repository(&mut self, s: Arc<dyn RepositoryScanner>) -> &mut Self {
        self.repository.push(s);
        self
    }

    pub fn package_scanners(&self) -> &[Arc<dyn PackageScanner>] {
        &self.package
    }

    pub fn distribution_scanners(&self) -> &[Arc<dyn DistributionScanner>] {
        &self.distribution
    }

    pub fn repository_scanners(&self) -> &[Arc<dyn RepositoryScanner>] {
        &self.repository
    }
}

/// Overlay deletion marker found in a layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whiteout {
    /// The named lower-layer path is deleted
    Path(String),
    /// Everything under the directory is deleted (`.wh..wh..opq`)
    Opaque(String),
}

/// A scanner failure attributed to one (layer, scanner) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub scanner: String,
    pub message: String,
}

/// Everything one layer contributed, with scanner attribution
#[derive(Debug, Clone)]
pub struct LayerArtifacts {
    pub layer: Digest,
    pub packages: Vec<(String, Vec<Package>)>,
    pub distributions: Vec<(String, Distribution)>,
    pub repositories: Vec<(String, Vec<Repository>)>,
    pub whiteouts: Vec<Whiteout>,
    pub errors: Vec<ScanError>,
}

type Key = (String, &'static str, &'static str);
type Cell<T> = Arc<OnceLock<Result<T, String>>>;

/// Result cache keyed by (layer digest, scanner name, scanner version)
///
/// Hits skip the scan entirely; concurrent misses on one key are
/// deduplicated, so a layer is never scanned twice by the same scanner at
/// the same time. Failed scans are not retained.
#[derive(Default)]
pub struct ScanCache {
    packages: Mutex<HashMap<Key, Cell<Arc<Vec<Package>>>>>,
    distributions: Mutex<HashMap<Key, Cell<Option<Distribution>>>>,
    repositories: Mutex<HashMap<Key, Cell<Arc<Vec<Repository>>>>>,
}

fn cached<T: Clone>(
    map: &Mutex<HashMap<Key, Cell<T>>>,
    key: Key,
    run: impl FnOnce() -> Result<T, String>,
) -> Result<T, String> {
    let cell = {
        let mut m = map.lock().expect("scan cache poisoned");
        m.entry(key.clone()).or_default().clone()
    };
    let out = cell.get_or_init(run).clone();
    if out.is_err() {
        // forget the failure so a later index attempt retries
        let mut m = map.lock().expect("scan cache poisoned");
        if let Some(cur) = m.get(&key) {
            if Arc::ptr_eq(cur, &cell) {
                m.remove(&key);
            }
        }
    }
    out
}

/// Runs every applicable scanner against one layer's filesystem view
pub struct LayerScanner {
    registry: Arc<ScannerRegistry>,
    cache: Arc<ScanCache>,
}

impl LayerScanner {
    pub fn new(registry: Arc<ScannerRegistry>, cache: Arc<ScanCache>) -> Self {
        Self { registry, cache }
    }

    /// Scan one layer with the whole fleet
    ///
    /// Scanner failures land in [`LayerArtifacts::errors`] and never abort
    /// the siblings.
    pub fn scan_layer(&self, cancel: &CancelToken, digest: &Digest, fs: &TarFs) -> LayerArtifacts {
        let mut art = LayerArtifacts {
            layer: digest.clone(),
            packages: Vec::new(),
            distributions: Vec::new(),
            repositories: Vec::new(),
            whiteouts: collect_whiteouts(fs),
            errors: Vec::new(),
        };
        let key = |name, version| (digest.to_string(), name, version);

        for s in self.registry.package_scanners() {
            if cancel.is_cancelled() {
                break;
            }
            let res = cached(&self.cache.packages, key(s.name(), s.version()), || {
                debug!(layer = %digest, scanner = s.name(), "package scan");
                s.scan(fs).map(Arc::new).map_err(|e| format!("{:#}", e))
            });
            match res {
                Ok(pkgs) if !pkgs.is_empty() => {
                    art.packages.push((s.name().to_string(), (*pkgs).clone()))
                }
                Ok(_) => {}
                Err(message) => {
                    warn!(layer = %digest, scanner = s.name(), %message, "package scan failed");
                    art.errors.push(ScanError {
                        scanner: s.name().to_string(),
                        message,
                    });
                }
            }
        }

        for s in self.registry.distribution_scanners() {
            if cancel.is_cancelled() {
                break;
            }
            let res = cached(&self.cache.distributions, key(s.name(), s.version()), || {
                debug!(layer = %digest, scanner = s.name(), "distribution scan");
                s.scan(fs).map_err(|e| format!("{:#}", e))
            });
            match res {
                Ok(Some(dist)) => art.distributions.push((s.name().to_string(), dist)),
                Ok(None) => {}
                Err(message) => {
                    warn!(layer = %digest, scanner = s.name(), %message, "distribution scan failed");
                    art.errors.push(ScanError {
                        scanner: s.name().to_string(),
                        message,
                    });
                }
            }
        }

        for s in self.registry.repository_scanners() {
            if cancel.is_cancelled() {
                break;
            }
            let res = cached(&self.cache.repositories, key(s.name(), s.version()), || {
                debug!(layer = %digest, scanner = s.name(), "repository scan");
                s.scan(fs).map(Arc::new).map_err(|e| format!("{:#}", e))
            });
            match res {
                Ok(repos) if !repos.is_empty() => {
                    art.repositories.push((s.name().to_string(), (*repos).clone()))
                }
                Ok(_) => {}
                Err(message) => {
                    warn!(layer = %digest, scanner = s.name(), %message, "repository scan failed");
                    art.errors.push(ScanError {
                        scanner: s.name().to_string(),
                        message,
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            art.errors.push(ScanError {
                scanner: "layer-scanner".to_string(),
                message: "scan cancelled".to_string(),
            });
        }
        art
    }
}

/// Pull the OCI whiteout markers out of a layer
fn collect_whiteouts(fs: &TarFs) -> Vec<Whiteout> {
    let mut out = Vec::new();
    for info in fs.entries() {
        let base = info.base_name();
        let dir = match info.path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        };
        if base == ".wh..wh..opq" {
            out.push(Whiteout::Opaque(dir.to_string()));
        } else if let Some(rest) = base.strip_prefix(".wh.") {
            let path = if dir.is_empty() {
                rest.to_string()
            } else {
                format!("{}/{}", dir, rest)
            };
            out.push(Whiteout::Path(path));
        }
    }
    out
}
