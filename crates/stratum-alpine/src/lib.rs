//! Alpine Linux support
//!
//! Scanners for the apk installed database and os-release, updaters for
//! the secdb security database (one per branch × repository), and the
//! matcher wiring them together with apk version ordering.
//!
//! Data source: <https://secdb.alpinelinux.org/>

mod dist;
mod matcher;
mod pkg;
mod secdb;
pub mod version;

pub use dist::{release, DistScanner};
pub use matcher::AlpineMatcher;
pub use pkg::{ApkPackageScanner, ApkRepoScanner};
pub use secdb::{AlpineFactory, SecdbUpdater};

/// Path of the apk installed database inside a layer
pub const INSTALLED_DB: &str = "lib/apk/db/installed";
