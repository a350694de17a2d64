//! Content hashes and digesters
//!
//! Every object published through a session is identified by a [`ContentHash`]:
//! a fixed-size digest tagged with the algorithm that produced it and, for
//! special objects, a one-character suffix (catalogs, histories, ...).
//!
//! Digests are produced by a [`Digester`]. The session pipeline never picks an
//! algorithm itself; a digester is injected where hashing or request signing
//! is needed.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Size of every supported digest in bytes (256 bits)
pub const DIGEST_SIZE: usize = 32;

/// Context string used to derive BLAKE3 signing keys from shared secrets
const BLAKE3_HMAC_CONTEXT: &str = "cask 2024 gateway request signing";

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid digest length, expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid hex digest: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("unknown object suffix: {0}")]
    UnknownSuffix(char),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// Tag appended to the hex rendering; SHA-256 is the implicit default
    fn tag(&self) -> Option<&'static str> {
        match self {
            HashAlgorithm::Sha256 => None,
            HashAlgorithm::Blake3 => Some("blake3"),
        }
    }
}

/// Marks an object as something other than plain file content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectSuffix {
    Catalog,
    History,
    Certificate,
    Metainfo,
}

impl ObjectSuffix {
    pub fn as_char(&self) -> char {
        match self {
            ObjectSuffix::Catalog => 'C',
            ObjectSuffix::History => 'H',
            ObjectSuffix::Certificate => 'X',
            ObjectSuffix::Metainfo => 'M',
        }
    }

    pub fn from_char(c: char) -> Result<Self, HashError> {
        match c {
            'C' => Ok(ObjectSuffix::Catalog),
            'H' => Ok(ObjectSuffix::History),
            'X' => Ok(ObjectSuffix::Certificate),
            'M' => Ok(ObjectSuffix::Metainfo),
            other => Err(HashError::UnknownSuffix(other)),
        }
    }
}

/// A digest identifying a content-addressed object
///
/// Rendered as `<hex>[-<algorithm>][<suffix>]`, e.g.
/// `ba7816bf...15ad` for a plain SHA-256 object or `...-blake3C` for a
/// BLAKE3-addressed catalog.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: [u8; DIGEST_SIZE],
    suffix: Option<ObjectSuffix>,
}

impl ContentHash {
    pub fn new(algorithm: HashAlgorithm, digest: [u8; DIGEST_SIZE]) -> Self {
        Self {
            algorithm,
            digest,
            suffix: None,
        }
    }

    /// Create a hash from a digest byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `DIGEST_SIZE` bytes.
    pub fn from_slice(algorithm: HashAlgorithm, data: &[u8]) -> Result<Self, HashError> {
        if data.len() != DIGEST_SIZE {
            return Err(HashError::InvalidLength {
                expected: DIGEST_SIZE,
                got: data.len(),
            });
        }
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(data);
        Ok(Self::new(algorithm, digest))
    }

    pub fn with_suffix(mut self, suffix: ObjectSuffix) -> Self {
        self.suffix = Some(suffix);
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn suffix(&self) -> Option<ObjectSuffix> {
        self.suffix
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.digest
    }

    /// Lowercase hex of the digest alone, without algorithm tag or suffix
    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())?;
        if let Some(tag) = self.algorithm.tag() {
            write!(f, "-{}", tag)?;
        }
        if let Some(suffix) = self.suffix {
            write!(f, "{}", suffix.as_char())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_len = DIGEST_SIZE * 2;
        if s.len() < hex_len || !s.is_char_boundary(hex_len) {
            return Err(HashError::InvalidLength {
                expected: hex_len,
                got: s.len(),
            });
        }
        let (digest_hex, mut rest) = s.split_at(hex_len);
        let digest = hex::decode(digest_hex)?;

        let mut algorithm = HashAlgorithm::Sha256;
        if let Some(tagged) = rest.strip_prefix('-') {
            let tag_end = tagged
                .find(|c: char| !c.is_ascii_lowercase() && !c.is_ascii_digit())
                .unwrap_or(tagged.len());
            let (tag, remainder) = tagged.split_at(tag_end);
            algorithm = match tag {
                "blake3" => HashAlgorithm::Blake3,
                other => return Err(HashError::UnknownAlgorithm(other.to_string())),
            };
            rest = remainder;
        }

        let mut hash = Self::from_slice(algorithm, &digest)?;
        let mut chars = rest.chars();
        match (chars.next(), chars.next()) {
            (None, _) => {}
            (Some(c), None) => hash = hash.with_suffix(ObjectSuffix::from_char(c)?),
            (Some(_), Some(_)) => {
                return Err(HashError::InvalidLength {
                    expected: hex_len + 1,
                    got: s.len(),
                })
            }
        }
        Ok(hash)
    }
}

/// Hashing collaborator
///
/// Produces content hashes and keyed message authentication codes. Callers are
/// algorithm-agnostic; the concrete digester is chosen by whoever builds the
/// session.
pub trait Digester: Send + Sync + fmt::Debug {
    fn algorithm(&self) -> HashAlgorithm;

    /// Hash a byte slice
    fn compute(&self, data: &[u8]) -> ContentHash;

    /// Hash everything a reader yields until EOF
    fn compute_reader(&self, reader: &mut dyn Read) -> Result<ContentHash, HashError>;

    /// Keyed MAC of `data` under `secret`
    fn hmac(&self, secret: &[u8], data: &[u8]) -> ContentHash;
}

/// SHA-256 digests and HMAC-SHA256 signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digester;

impl Digester for Sha256Digester {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn compute(&self, data: &[u8]) -> ContentHash {
        let digest = Sha256::digest(data);
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&digest);
        ContentHash::new(HashAlgorithm::Sha256, out)
    }

    fn compute_reader(&self, reader: &mut dyn Read) -> Result<ContentHash, HashError> {
        let mut hasher = Sha256::new();
        std::io::copy(reader, &mut hasher)?;
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&hasher.finalize());
        Ok(ContentHash::new(HashAlgorithm::Sha256, out))
    }

    fn hmac(&self, secret: &[u8], data: &[u8]) -> ContentHash {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes());
        ContentHash::new(HashAlgorithm::Sha256, out)
    }
}

/// BLAKE3 digests; signatures use BLAKE3's keyed mode with a key derived
/// from the shared secret
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Digester;

impl Digester for Blake3Digester {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Blake3
    }

    fn compute(&self, data: &[u8]) -> ContentHash {
        ContentHash::new(HashAlgorithm::Blake3, *blake3::hash(data).as_bytes())
    }

    fn compute_reader(&self, reader: &mut dyn Read) -> Result<ContentHash, HashError> {
        let mut hasher = blake3::Hasher::new();
        std::io::copy(reader, &mut hasher)?;
        Ok(ContentHash::new(
            HashAlgorithm::Blake3,
            *hasher.finalize().as_bytes(),
        ))
    }

    fn hmac(&self, secret: &[u8], data: &[u8]) -> ContentHash {
        let key = blake3::derive_key(BLAKE3_HMAC_CONTEXT, secret);
        ContentHash::new(
            HashAlgorithm::Blake3,
            *blake3::keyed_hash(&key, data).as_bytes(),
        )
    }
}
