#![deny(missing_docs)]

//! Message digest support for the blobstore crates, built on the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) family.
//!
//! Unlike most users of the `digest` traits, a blob store picks its hash
//! algorithm at *runtime*: the store is constructed from an algorithm name
//! and every identifier it ever produces or accepts is sized by that choice.
//! This crate therefore wraps the static RustCrypto hashers in a small
//! dynamic layer:
//!
//! - [`DigestAlgorithm`]: the supported algorithms, parseable from their
//!   conventional names ("MD5", "SHA-1", "SHA-256").
//! - [`Hasher`]: a streaming hasher for a chosen algorithm.
//! - [`HashingWriter`]: an object that wraps a writable object and
//!   implements [`Write`], forwarding the data to the wrapped object while
//!   also computing the hash of the content on the fly.
//! - [`compute_bytes_digest`]: one-shot digest of an in-memory buffer.
//!
//! # Examples
//!
//! ```
//! use blobstore_digest::{compute_bytes_digest, DigestAlgorithm};
//!
//! let algorithm: DigestAlgorithm = "SHA-256".parse().unwrap();
//! let digest = compute_bytes_digest(algorithm, "Hello, world!");
//! assert_eq!(digest.len(), algorithm.digest_len());
//! ```

use std::{fmt, io::Write, str::FromStr};

use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;

/// The error returned when an algorithm name cannot be resolved to a
/// [`DigestAlgorithm`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown digest algorithm '{name}'")]
pub struct UnknownAlgorithmError {
    /// The algorithm name that could not be resolved.
    pub name: String,
}

/// A message digest algorithm supported by the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// The MD5 algorithm (16-byte digests).
    Md5,
    /// The SHA-1 algorithm (20-byte digests).
    Sha1,
    /// The SHA-256 algorithm (32-byte digests).
    Sha256,
}

impl DigestAlgorithm {
    /// Returns the length in bytes of digests produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 16,
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
        }
    }

    /// Returns the conventional name of this algorithm.
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }

    /// Returns a fresh streaming [`Hasher`] for this algorithm.
    pub fn hasher(self) -> Hasher {
        match self {
            DigestAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = UnknownAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "").as_str() {
            "MD5" => Ok(DigestAlgorithm::Md5),
            "SHA1" => Ok(DigestAlgorithm::Sha1),
            "SHA256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(UnknownAlgorithmError {
                name: s.to_string(),
            }),
        }
    }
}

/// A streaming hasher for a [`DigestAlgorithm`] chosen at runtime.
pub enum Hasher {
    /// An in-progress MD5 computation.
    Md5(Md5),
    /// An in-progress SHA-1 computation.
    Sha1(Sha1),
    /// An in-progress SHA-256 computation.
    Sha256(Sha256),
}

impl Hasher {
    /// Feeds more data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the digest bytes.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hasher::Md5(_) => "Md5",
            Hasher::Sha1(_) => "Sha1",
            Hasher::Sha256(_) => "Sha256",
        };
        f.debug_tuple("Hasher").field(&name).finish()
    }
}

/// A simple object that provides a [`Write`] implementation that also
/// immediately hashes the bytes written to it. Call
/// [`HashingWriter::finalize`] to retrieve both the original `impl Write`
/// object as well as the digest.
pub struct HashingWriter<W> {
    writer: W,
    hasher: Hasher,
}

impl<W> HashingWriter<W> {
    /// Constructs a new instance from a writer and a new (empty) hasher for
    /// the given algorithm.
    pub fn new(writer: W, algorithm: DigestAlgorithm) -> Self {
        Self {
            writer,
            hasher: algorithm.hasher(),
        }
    }

    /// Consumes this instance and returns the original writer and the digest
    /// of all bytes written to this instance.
    pub fn finalize(self) -> (W, Vec<u8>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Computes the digest of the specified bytes under the given algorithm.
pub fn compute_bytes_digest(algorithm: DigestAlgorithm, bytes: impl AsRef<[u8]>) -> Vec<u8> {
    let mut hasher = algorithm.hasher();
    hasher.update(bytes.as_ref());
    hasher.finalize()
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use rstest::rstest;

    use super::{compute_bytes_digest, DigestAlgorithm, HashingWriter};

    #[rstest]
    #[case(DigestAlgorithm::Md5, "6cd3556deb0da54bca060b4c39479839")]
    #[case(DigestAlgorithm::Sha1, "943a702d06f34599aee1f8da8ef9f7296031d699")]
    #[case(
        DigestAlgorithm::Sha256,
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    )]
    fn test_compute_bytes_digest(#[case] algorithm: DigestAlgorithm, #[case] expected: &str) {
        let digest = compute_bytes_digest(algorithm, "Hello, world!");
        assert_eq!(hex::encode(digest), expected);
        assert_eq!(
            compute_bytes_digest(algorithm, "Hello, world!").len(),
            algorithm.digest_len()
        );
    }

    #[rstest]
    #[case("MD5", DigestAlgorithm::Md5)]
    #[case("md5", DigestAlgorithm::Md5)]
    #[case("SHA-1", DigestAlgorithm::Sha1)]
    #[case("sha1", DigestAlgorithm::Sha1)]
    #[case("SHA-256", DigestAlgorithm::Sha256)]
    #[case("sha256", DigestAlgorithm::Sha256)]
    fn test_parse_algorithm(#[case] name: &str, #[case] expected: DigestAlgorithm) {
        assert_eq!(name.parse::<DigestAlgorithm>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_algorithm() {
        let err = "SHA-512/224".parse::<DigestAlgorithm>().unwrap_err();
        assert_eq!(err.name, "SHA-512/224");
    }

    #[test]
    fn test_hashing_writer_matches_one_shot() {
        let mut writer = HashingWriter::new(Vec::new(), DigestAlgorithm::Sha256);
        writer.write_all(b"Hello, ").unwrap();
        writer.write_all(b"world!").unwrap();
        let (buffer, digest) = writer.finalize();

        assert_eq!(buffer, b"Hello, world!");
        assert_eq!(
            digest,
            compute_bytes_digest(DigestAlgorithm::Sha256, "Hello, world!")
        );
    }

    #[test]
    fn test_empty_digest() {
        assert_eq!(
            hex::encode(compute_bytes_digest(DigestAlgorithm::Sha256, b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
