//! Core data model for stratum
//!
//! Every other crate in the workspace speaks these types: manifests and
//! layers on the way in, index reports in the middle, vulnerabilities and
//! vulnerability reports on the way out.

pub mod cancel;
pub mod digest;
pub mod manifest;
pub mod package;
pub mod purl;
pub mod report;
pub mod update;
pub mod vulnerability;

pub use cancel::{CancelToken, Cancelled};
pub use digest::{Algorithm, Digest, DigestError};
pub use manifest::{Layer, Manifest};
pub use package::{Distribution, Package, PackageKind, Repository};
pub use report::{
    Environment, IndexRecord, IndexReport, IndexState, VulnerabilityReport,
};
pub use update::{
    EnrichmentRecord, Fingerprint, UpdateDiff, UpdateKind, UpdateOperation,
};
pub use vulnerability::{ArchOp, MatchConstraint, Severity, Vulnerability};
