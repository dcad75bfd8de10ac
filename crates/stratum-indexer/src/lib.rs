//! The indexer pipeline
//!
//! manifest ⇒ realized layer views ⇒ per-layer artifacts ⇒ coalescer ⇒
//! image inventory. Layers are fetched into a content-addressed arena,
//! each layer is run through the registered scanner fleet (with results
//! cached by layer digest and scanner version), and the ordered artifact
//! list is reduced into one [`IndexReport`](stratum_core::IndexReport).

pub mod coalesce;
pub mod fetch;
pub mod osrelease;
pub mod scan;

mod indexer;

pub use coalesce::Coalescer;
pub use fetch::{digest_blob, LayerArena};
pub use indexer::Indexer;
pub use scan::{
    DistributionScanner, LayerArtifacts, LayerScanner, PackageScanner, RepositoryScanner,
    ScanCache, ScanError, ScannerRegistry, Whiteout,
};
