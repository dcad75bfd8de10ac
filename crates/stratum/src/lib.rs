//! stratum: container-image vulnerability analysis
//!
//! The library side of the CLI: loading saved image tarballs into
//! manifests, the default scanner/matcher/updater wiring, and the
//! configuration file shape. The heavy lifting lives in the per-concern
//! crates this one assembles.

pub mod config;
pub mod defaults;
pub mod oci;
