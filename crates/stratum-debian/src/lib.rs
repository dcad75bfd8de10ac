//! Debian and Ubuntu support
//!
//! Scanners for the dpkg status database and os-release, updaters for the
//! Debian security tracker and Ubuntu OVAL feeds, and the matchers tying
//! them together under dpkg version ordering.
//!
//! Data sources:
//! - Debian Security Tracker: <https://security-tracker.debian.org/tracker/>
//! - Ubuntu OVAL: <https://security-metadata.canonical.com/oval/>

mod dist;
mod matcher;
mod pkg;
mod tracker;
mod ubuntu;
pub mod version;

pub use dist::{
    debian_release, ubuntu_release, ubuntu_release_by_codename, DebianDistScanner,
    UbuntuDistScanner,
};
pub use matcher::{DebianMatcher, UbuntuMatcher};
pub use pkg::DpkgPackageScanner;
pub use tracker::{DebianFactory, DebianUpdater};
pub use ubuntu::{UbuntuFactory, UbuntuUpdater};

/// Path of the primary dpkg status database
pub const STATUS_DB: &str = "var/lib/dpkg/status";

/// Distroless images ship per-package status files here instead
pub const STATUS_D_GLOB: &str = "var/lib/dpkg/status.d/*";
