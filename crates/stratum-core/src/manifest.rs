//! Image manifests and layer references

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Ordered sequence of layer references
///
/// Order is significant: lower index means older layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub hash: Digest,
    pub layers: Vec<Layer>,
}

/// A single layer reference: a digest plus a fetch hint
///
/// The hint is either a URI with request headers or a local path. A layer
/// is immutable; its realized contents live only for the duration of an
/// index operation unless the arena keeps them cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub hash: Digest,
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl Layer {
    /// Layer fetched from a URI
    pub fn from_uri(hash: Digest, uri: impl Into<String>) -> Self {
        Self {
            hash,
            uri: uri.into(),
            headers: HashMap::new(),
            local_path: None,
        }
    }

    /// Layer read from a local file
    pub fn from_local(hash: Digest, path: impl Into<PathBuf>) -> Self {
        Self {
            hash,
            uri: String::new(),
            headers: HashMap::new(),
            local_path: Some(path.into()),
        }
    }
}
