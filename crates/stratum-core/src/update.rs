//! Update operations: the append-only revision log of the vulnerability
//! database

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vulnerability::Vulnerability;

/// Opaque conditional-fetch token
///
/// Produced by an updater's fetch, persisted by the store, handed back on
/// the next fetch. Neither the store nor the manager may interpret it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a particular update operation carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Vulnerability,
    Enrichment,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Vulnerability => "vulnerability",
            UpdateKind::Enrichment => "enrichment",
        }
    }
}

/// One atomic revision of a feed's contribution to the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOperation {
    #[serde(rename = "ref")]
    pub reference: Uuid,
    pub updater: String,
    pub fingerprint: Fingerprint,
    pub date: DateTime<Utc>,
    pub kind: UpdateKind,
}

/// Set difference between two update operations of one updater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<UpdateOperation>,
    pub cur: UpdateOperation,
    pub added: Vec<Vulnerability>,
    pub removed: Vec<Vulnerability>,
}

/// A side-channel metadata record, e.g. a CVSS vector keyed by CVE id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub tags: Vec<String>,
    pub enrichment: serde_json::Value,
}
