//! Indexer pipeline orchestration

use std::sync::Arc;

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, info};

use stratum_core::{CancelToken, IndexReport, IndexState, Manifest};

use crate::coalesce::Coalescer;
use crate::fetch::LayerArena;
use crate::scan::{LayerArtifacts, LayerScanner, ScanCache, ScannerRegistry};

/// Drives manifest ⇒ layer views ⇒ artifacts ⇒ inventory
pub struct Indexer {
    arena: LayerArena,
    scanner: LayerScanner,
    coalescer: Coalescer,
}

impl Indexer {
    pub fn new(arena: LayerArena, registry: Arc<ScannerRegistry>) -> Self {
        Self {
            arena,
            scanner: LayerScanner::new(registry, Arc::new(ScanCache::default())),
            coalescer: Coalescer::new(),
        }
    }

    /// Index one manifest
    ///
    /// Always returns a terminal report: `IndexFinished` with the
    /// (possibly partial) inventory, or `IndexError` when the pipeline
    /// itself failed, e.g. a layer that could not be fetched or read.
    /// Scanner failures do not fail the pipeline; they are carried in
    /// `err`.
    pub fn index(&self, cancel: &CancelToken, manifest: &Manifest) -> IndexReport {
        info!(manifest = %manifest.hash, layers = manifest.layers.len(), "indexing");
        match self.run(cancel, manifest) {
            Ok(report) => {
                debug!(
                    manifest = %manifest.hash,
                    packages = report.packages.len(),
                    "index finished"
                );
                report
            }
            Err(e) => {
                let mut report = IndexReport::new(manifest.hash.clone());
                report.state = IndexState::IndexError;
                report.success = false;
                report.err = Some(format!("{:#}", e));
                report
            }
        }
    }

    fn run(&self, cancel: &CancelToken, manifest: &Manifest) -> Result<IndexReport> {
        // realize and scan layers in parallel; collect() preserves
        // manifest order for the coalescer
        let artifacts: Vec<LayerArtifacts> = manifest
            .layers
            .par_iter()
            .map(|layer| -> Result<LayerArtifacts> {
                cancel.checkpoint()?;
                let fs = self.arena.realize(cancel, layer)?;
                Ok(self.scanner.scan_layer(cancel, &layer.hash, &fs))
            })
            .collect::<Result<Vec<_>>>()?;
        cancel.checkpoint()?;
        Ok(self.coalescer.coalesce(manifest.hash.clone(), &artifacts))
    }
}
