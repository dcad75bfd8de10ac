//! Content-address digests
//!
//! Manifests and layers are identified by a digest in the usual
//! `algorithm:hex` notation (e.g. `sha256:9f86d0...`).

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Digest algorithms understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Length of the raw checksum in bytes
    pub fn checksum_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 32,
            Algorithm::Sha512 => 64,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced when parsing a digest string
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("digest is missing the ':' separator")]
    MissingSeparator,
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("checksum is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("wrong checksum length for {algorithm}: expected {expected} bytes, got {got}")]
    BadLength {
        algorithm: Algorithm,
        expected: usize,
        got: usize,
    },
}

/// An algorithm tag plus raw checksum bytes
///
/// Compared and serialized as `algo:hex`. The primary identity for
/// manifests and layers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    checksum: Vec<u8>,
}

impl Digest {
    /// Build a digest from an algorithm and raw checksum bytes
    pub fn new(algorithm: Algorithm, checksum: Vec<u8>) -> Result<Self, DigestError> {
        if checksum.len() != algorithm.checksum_len() {
            return Err(DigestError::BadLength {
                algorithm,
                expected: algorithm.checksum_len(),
                got: checksum.len(),
            });
        }
        Ok(Self {
            algorithm,
            checksum,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn checksum(&self) -> &[u8] {
        &self.checksum
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hexsum) = s.split_once(':').ok_or(DigestError::MissingSeparator)?;
        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            "sha512" => Algorithm::Sha512,
            other => return Err(DigestError::UnknownAlgorithm(other.to_string())),
        };
        let checksum = hex::decode(hexsum)?;
        Digest::new(algorithm, checksum)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.checksum))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUM: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_parse_and_display_round_trip() {
        let s = format!("sha256:{}", SUM);
        let d: Digest = s.parse().unwrap();
        assert_eq!(d.algorithm(), Algorithm::Sha256);
        assert_eq!(d.to_string(), s);
    }

    #[test]
    fn test_reject_unknown_algorithm() {
        let err = format!("md5:{}", SUM).parse::<Digest>().unwrap_err();
        assert!(matches!(err, DigestError::UnknownAlgorithm(_)));
    }

    #[test]
    fn test_reject_wrong_length() {
        let err = "sha256:dead".parse::<Digest>().unwrap_err();
        assert!(matches!(err, DigestError::BadLength { .. }));
    }

    #[test]
    fn test_reject_missing_separator() {
        let err = SUM.parse::<Digest>().unwrap_err();
        assert!(matches!(err, DigestError::MissingSeparator));
    }

    #[test]
    fn test_serde_round_trip() {
        let s = format!("sha256:{}", SUM);
        let d: Digest = s.parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", s));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
