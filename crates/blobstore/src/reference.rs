//! Validated blob identifiers.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use crate::error::{Result, StoreError};

/// A reference to a blob within a store: the fixed-length digest of the blob
/// contents, carried both as raw bytes and as the equivalent lowercase hex
/// string.
///
/// The required length is dictated by the digest algorithm of the store that
/// produced the reference; references are not portable between stores
/// configured with different algorithms.
#[derive(Debug, Clone)]
pub struct BlobRef {
    bytes: Vec<u8>,
    hex: String,
}

impl BlobRef {
    /// Parses a reference from its hex string form. The input must be
    /// exactly `2 * digest_len` characters of `[0-9a-fA-F]`; uppercase is
    /// accepted and normalized to lowercase.
    pub fn from_hex(id: &str, digest_len: usize) -> Result<Self> {
        if id.len() != digest_len * 2 {
            return Err(StoreError::BadIdentifier(format!(
                "'{id}' must be {}-character hexadecimal",
                digest_len * 2
            )));
        }
        let bytes = hex::decode(id).map_err(|_| {
            StoreError::BadIdentifier(format!("'{id}' contains non-hexadecimal characters"))
        })?;
        let hex = hex::encode(&bytes);
        Ok(Self { bytes, hex })
    }

    /// Builds a reference from raw digest bytes, which must be exactly
    /// `digest_len` long.
    pub fn from_bytes(digest: &[u8], digest_len: usize) -> Result<Self> {
        if digest.len() != digest_len {
            return Err(StoreError::BadIdentifier(format!(
                "digest must be {digest_len} bytes long, got {}",
                digest.len()
            )));
        }
        Ok(Self {
            bytes: digest.to_vec(),
            hex: hex::encode(digest),
        })
    }

    /// Returns the lowercase hex form of this reference.
    pub fn id(&self) -> &str {
        &self.hex
    }

    /// Returns the raw digest bytes of this reference.
    pub fn digest(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

impl PartialEq for BlobRef {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for BlobRef {}

impl Hash for BlobRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}
