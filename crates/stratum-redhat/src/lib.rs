//! Red Hat family support
//!
//! Scanners for the rpm database (the SQLite layout modern releases
//! ship) and os-release/redhat-release, an updater for the Red Hat
//! Security Data API, and the matcher applying rpm EVR ordering.
//!
//! Data source: <https://access.redhat.com/hydra/rest/securitydata/>

mod dist;
mod header;
mod matcher;
mod pkg;
mod secdata;
pub mod version;

pub use dist::{release, RedhatDistScanner};
pub use matcher::RedhatMatcher;
pub use pkg::RpmPackageScanner;
pub use secdata::{RedhatFactory, RedhatUpdater};
