//! Vulnerability store
//!
//! An append-only log of update operations over a SQLite database.
//! Vulnerability rows are deduplicated by content hash; the latest
//! operation per updater defines the live snapshot; garbage collection
//! trims strictly older operations and sweeps orphaned rows.
//!
//! Also home to the advisory [`LockSource`] the update manager uses for
//! cluster-wide single-flight, with an in-process and a file-backed
//! implementation.

mod lock;
mod store;

pub use lock::{FileLocks, LockGuard, LockSource, ProcessLocks};
pub use store::{Store, UpdaterStatus};

use uuid::Uuid;

/// Store failure kinds
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error")]
    Db(#[from] rusqlite::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("no such update operation: {0}")]
    NotFound(Uuid),
    #[error("bad persisted value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
