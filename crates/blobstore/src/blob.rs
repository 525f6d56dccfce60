//! Handles to stored blobs.

use std::{fmt, io::Read, path::PathBuf};

use crate::{error::Result, fs::MeteredFs, reference::BlobRef};

/// A handle to a blob in the store.
///
/// The handle carries the blob's identifier and its size as observed when
/// the handle was created; it holds only the path of the backing file, not
/// the file itself. A handle may therefore outlive the blob: if the blob is
/// deleted after the handle was returned, [`Blob::reader`] will fail.
#[derive(Debug, Clone)]
pub struct Blob {
    id: String,
    path: PathBuf,
    size: u64,
}

impl Blob {
    /// Creates a handle for the blob at `path`, reading its current size.
    pub(crate) fn new(reference: &BlobRef, path: PathBuf, fs: &MeteredFs) -> Result<Self> {
        let size = fs.size(&path)?;
        Ok(Self {
            id: reference.id().to_string(),
            path,
            size,
        })
    }

    /// Returns the lowercase hex identifier of this blob.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the size of the blob in bytes, as cached at handle creation.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Opens a fresh stream over the blob contents.
    pub fn reader(&self) -> std::io::Result<impl Read> {
        fs_err::File::open(&self.path)
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.id, self.size)
    }
}
