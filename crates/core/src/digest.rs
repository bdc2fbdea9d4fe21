//! Content digest types and incremental hashing.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest as Sha2Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static ALGO_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z0-9]+$").expect("algo regex"));
static HEX_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-f0-9]+$").expect("hex regex"));

/// Supported digest algorithms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Expected length of the hex-encoded hash.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::InvalidDigest(format!(
                "unsupported digest algorithm: {other}"
            ))),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// A content digest in canonical `algorithm:hex` form.
///
/// The digest is the identity of every immutable object in the registry:
/// blobs are stored under it, manifests are addressed by it, and upload
/// commits are verified against it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    /// Parse a digest from its canonical `algorithm:hex` form.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(format!("missing algorithm separator: {s}")))?;

        if !ALGO_RE.is_match(algo) {
            return Err(Error::InvalidDigest(format!("malformed algorithm: {s}")));
        }
        let algorithm = DigestAlgorithm::from_str(algo)?;

        if !HEX_RE.is_match(hex) {
            return Err(Error::InvalidDigest(format!("malformed hex: {s}")));
        }
        if hex.len() != algorithm.hex_len() {
            return Err(Error::InvalidDigest(format!(
                "expected {} hex chars for {algorithm}, got {}",
                algorithm.hex_len(),
                hex.len()
            )));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Compute the SHA-256 digest of a byte slice.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Create an incremental hasher for the given algorithm.
    pub fn hasher(algorithm: DigestAlgorithm) -> DigestHasher {
        match algorithm {
            DigestAlgorithm::Sha256 => DigestHasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => DigestHasher::Sha512(Sha512::new()),
        }
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The hex-encoded hash, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, &self.hex[..12])
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?.to_lowercase();
        Digest::parse(&s).map_err(|e| de::Error::custom(format!("error parsing digest: {e}")))
    }
}

/// Incremental digest hasher for streaming verification.
pub enum DigestHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl DigestHasher {
    /// Feed data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest {
        match self {
            Self::Sha256(h) => Digest {
                algorithm: DigestAlgorithm::Sha256,
                hex: hex::encode(h.finalize()),
            },
            Self::Sha512(h) => Digest {
                algorithm: DigestAlgorithm::Sha512,
                hex: hex::encode(h.finalize()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parse_roundtrip() {
        let d = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(d.algorithm(), DigestAlgorithm::Sha256);
        assert_eq!(d.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn sha256_of_empty_matches_known_value() {
        assert_eq!(Digest::sha256(b"").to_string(), EMPTY_SHA256);
    }

    #[test]
    fn incremental_hasher_matches_oneshot() {
        let mut hasher = Digest::hasher(DigestAlgorithm::Sha256);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), Digest::sha256(b"hello world"));
    }

    #[test]
    fn rejects_malformed() {
        assert!(Digest::parse("sha256").is_err());
        assert!(Digest::parse("sha256:xyz").is_err());
        assert!(Digest::parse("md5:d41d8cd98f00b204e9800998ecf8427e").is_err());
        // Wrong hex length for the algorithm.
        assert!(Digest::parse("sha256:abcd").is_err());
        assert!(Digest::parse(&format!("sha512:{}", "a".repeat(64))).is_err());
    }

    #[test]
    fn serde_string_form() {
        let d: Digest = serde_json::from_value(serde_json::json!(EMPTY_SHA256)).unwrap();
        assert_eq!(serde_json::json!(d), serde_json::json!(EMPTY_SHA256));
    }

    #[test]
    fn deserialize_lowercases_input() {
        let upper = EMPTY_SHA256.to_uppercase().replace("SHA256", "sha256");
        let d: Digest = serde_json::from_value(serde_json::json!(upper)).unwrap();
        assert_eq!(d.to_string(), EMPTY_SHA256);
    }
}
