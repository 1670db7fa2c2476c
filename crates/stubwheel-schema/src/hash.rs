//! Content-hash hints carried in index listing URL fragments.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hash algorithms that may appear in an index URL fragment (`#sha256=...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5, still published by older indexes.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-224.
    Sha224,
    /// SHA-256, the common case.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
    /// SHA3-224.
    Sha3_224,
    /// SHA3-256.
    Sha3_256,
    /// SHA3-384.
    Sha3_384,
    /// SHA3-512.
    Sha3_512,
}

impl HashAlgorithm {
    /// Lowercase algorithm name as written in URL fragments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Sha3_224 => "sha3_224",
            Self::Sha3_256 => "sha3_256",
            Self::Sha3_384 => "sha3_384",
            Self::Sha3_512 => "sha3_512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "sha3_224" => Ok(Self::Sha3_224),
            "sha3_256" => Ok(Self::Sha3_256),
            "sha3_384" => Ok(Self::Sha3_384),
            "sha3_512" => Ok(Self::Sha3_512),
            _ => Err(format!("Unknown hash algorithm: {s}")),
        }
    }
}

/// A fragment names a known algorithm but its digest is unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {algorithm} digest {digest:?}")]
pub struct InvalidDigest {
    /// Algorithm named by the fragment.
    pub algorithm: HashAlgorithm,
    /// Digest text as it appeared.
    pub digest: String,
}

impl InvalidDigest {
    /// A hint no download can satisfy, so verification fails closed.
    pub fn into_unsatisfiable_hint(self) -> HashHint {
        HashHint {
            algorithm: self.algorithm,
            digest: self.digest,
        }
    }
}

/// Expected digest advertised by an index for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashHint {
    /// Algorithm the digest was computed with.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest.
    pub digest: String,
}

impl HashHint {
    /// Create a hint, lowercasing the digest.
    pub fn new(algorithm: HashAlgorithm, digest: &str) -> Self {
        Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        }
    }

    /// Parse a URL fragment of the form `{scheme}={digest}`.
    ///
    /// `Ok(None)` when the fragment is not a hash at all (no `=`, or an
    /// unknown scheme such as `egg=`).
    ///
    /// # Errors
    ///
    /// [`InvalidDigest`] when the scheme is a known algorithm but the digest
    /// is empty or not hex.
    pub fn from_fragment(fragment: &str) -> Result<Option<Self>, InvalidDigest> {
        let Some((scheme, digest)) = fragment.split_once('=') else {
            return Ok(None);
        };
        let Ok(algorithm) = scheme.parse() else {
            return Ok(None);
        };
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidDigest {
                algorithm,
                digest: digest.to_string(),
            });
        }
        Ok(Some(Self::new(algorithm, digest)))
    }

    /// Whether `actual` (hex, any case) equals the expected digest.
    pub fn matches(&self, actual: &str) -> bool {
        !self.digest.is_empty() && self.digest.eq_ignore_ascii_case(actual)
    }
}

impl std::fmt::Display for HashHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.algorithm, self.digest)
    }
}
