//! Random-access read-only filesystem view over a tar blob
//!
//! The archive is scanned once up front into a segment index: for every
//! member the byte offset of its header and the span of header plus data.
//! After that, reads seek straight to the member's data. PAX and GNU
//! extension headers are absorbed into the member that follows them.
//!
//! Format problems (bad magic, truncated archive, absurd size fields) are
//! reported as [`Error::Format`] so callers can tell "not a tar" apart
//! from an I/O failure.

mod entry;
mod fs;

pub use entry::{EntryKind, FileInfo};
pub use fs::{SubFs, TarFs};

/// Tar block size; headers and data spans are aligned to it
pub const BLOCK_SIZE: usize = 512;

/// Ceiling on how much of a nested archive is pulled into memory
pub const NESTED_ARCHIVE_MAX: u64 = 50 * 1024 * 1024;

/// Minimum size of a plausible zip archive (one end-of-central-directory
/// record)
pub const ZIP_MIN_SIZE: u64 = 22;

/// Errors from constructing or reading the view
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The blob is not a well-formed tar; the sentinel kind callers use to
    /// distinguish malformed input from I/O trouble
    #[error("tar format error: {0}")]
    Format(String),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("no such member: {0}")]
    NotFound(String),
    #[error("nested archive {path} is {size} bytes, over the {limit} byte ceiling")]
    NestedTooLarge { path: String, size: u64, limit: u64 },
    #[error("bad glob pattern: {0}")]
    BadPattern(#[from] glob::PatternError),
    #[error("too many links resolving {0}")]
    LinkLoop(String),
}

impl Error {
    /// True for the malformed-archive sentinel
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
