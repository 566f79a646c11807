//! Content fingerprints of compiled documents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 64-bit content hash of a compiled configuration document.
///
/// Equal fingerprints mean policy-equivalent documents. The repository
/// versions a proxy's namespace relative to the fingerprint, so arithmetic
/// on it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Wraps a raw hash value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Builds a fingerprint from the leading eight bytes of a digest.
    ///
    /// Digests shorter than eight bytes are zero-padded.
    #[must_use]
    pub fn from_digest(digest: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        let n = digest.len().min(8);
        buf[..n].copy_from_slice(&digest[..n]);
        Self(u64::from_be_bytes(buf))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The repository version `n` steps before this fingerprint.
    #[must_use]
    pub const fn offset_back(&self, n: u64) -> u64 {
        self.0.wrapping_sub(n)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
