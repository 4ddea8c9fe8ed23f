use std::fmt;

use crate::error::{CasError, Result};

/// Width of every digest in the system, in bytes.
pub const DIGEST_LEN: usize = 32;

/// Domain separator mixed into every object digest so object ids can never
/// collide with a bare BLAKE3 of some byte string.
const OBJECT_DOMAIN: &[u8] = b"strata.object.v1";

/// A raw 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Rebuild a digest from a byte slice read off disk.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// The hash function an id was produced with.
///
/// There is exactly one scheme today; the tag exists so persisted ids stay
/// self-describing if the hash is ever rotated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashScheme {
    Blake3,
}

impl HashScheme {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("blake3") {
            Some(Self::Blake3)
        } else {
            None
        }
    }
}

/// The externalized identity of an object: its digest plus the hash scheme.
///
/// This is the form used at system boundaries (persisted references,
/// diagnostics); inside one store instance, [`ObjectRef`](crate::ObjectRef)
/// is the working handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CasId {
    scheme: HashScheme,
    digest: Digest,
}

impl CasId {
    pub const fn new(scheme: HashScheme, digest: Digest) -> Self {
        Self { scheme, digest }
    }

    pub const fn blake3(digest: Digest) -> Self {
        Self::new(HashScheme::Blake3, digest)
    }

    pub const fn scheme(&self) -> HashScheme {
        self.scheme
    }

    pub const fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Parse the textual form `<scheme>:<hex digest>`.
    ///
    /// Both the scheme and the digest are accepted case-insensitively;
    /// printing always produces lower-case.
    pub fn parse(text: &str) -> Result<Self> {
        let (scheme, digest) = text.split_once(':').ok_or_else(|| CasError::InvalidId {
            text: text.to_string(),
            reason: "missing `:` scheme separator",
        })?;
        let scheme = HashScheme::from_name(scheme).ok_or_else(|| CasError::InvalidId {
            text: text.to_string(),
            reason: "unknown hash scheme",
        })?;
        let bytes = hex::decode(digest).map_err(|_| CasError::InvalidId {
            text: text.to_string(),
            reason: "digest is not valid hex",
        })?;
        let digest = Digest::from_slice(&bytes).ok_or_else(|| CasError::InvalidId {
            text: text.to_string(),
            reason: "digest has the wrong length",
        })?;
        Ok(Self::new(scheme, digest))
    }
}

impl fmt::Display for CasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme.name(), self.digest)
    }
}

impl fmt::Debug for CasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CasId({self})")
    }
}

/// BLAKE3 of a raw byte string.
///
/// For fingerprinting payloads that are not CAS objects (action keys,
/// captured file contents); object ids go through [`object_digest`].
pub fn digest_bytes(data: &[u8]) -> Digest {
    Digest(*blake3::hash(data).as_bytes())
}

/// Compute the content digest of an object from its canonical encoding.
///
/// The encoding is `domain || num_refs (u64 LE) || ref digests || data`.
/// Fixed-width digests make the framing unambiguous without a length prefix
/// on `data`.
pub fn object_digest(refs: &[Digest], data: &[u8]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(OBJECT_DOMAIN);
    hasher.update(&(refs.len() as u64).to_le_bytes());
    for r in refs {
        hasher.update(r.as_bytes());
    }
    hasher.update(data);
    Digest(*hasher.finalize().as_bytes())
}
