//! Java support
//!
//! A scanner for jar/war/ear archives found in layers (including one
//! level of archive-in-archive nesting) and the Maven matcher with
//! Maven's version ordering.

pub mod maven;
mod matcher;
mod scanner;

pub use matcher::JavaMatcher;
pub use scanner::{JavaPackageScanner, JavaRepoScanner, MAVEN_REPOSITORY};
