//! Staging of freshly received blob content.

use std::{
    io::{BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use blobstore_digest::{DigestAlgorithm, HashingWriter};
use tracing::{debug, error, warn};

use crate::{error::Result, fs::MeteredFs};

/// Buffer size for all stream copies into and out of the store.
pub(crate) const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Copies `reader` to `writer` with a fixed-size buffer, returning the
/// number of bytes written.
pub(crate) fn copy_stream(mut reader: impl Read, writer: &mut impl Write) -> std::io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        written += n as u64;
    }
}

/// A blob that has been received into the staging directory but not yet
/// adopted into the store.
///
/// Construction streams the source into a uniquely named temp file while
/// computing its digest. The temp file is owned by this value: it is deleted
/// on drop unless [`IncomingBlob::move_to`] has adopted it into its final
/// location first.
#[derive(Debug)]
pub(crate) struct IncomingBlob<'a> {
    fs: &'a MeteredFs,
    temp: Option<PathBuf>,
    size: u64,
    digest: Vec<u8>,
}

impl<'a> IncomingBlob<'a> {
    /// Streams `source` into `incoming_dir/incoming-<seq>.tmp`, computing
    /// the digest on the fly. On any read or write error the temp file is
    /// deleted before the error propagates.
    pub fn receive(
        fs: &'a MeteredFs,
        incoming_dir: &Path,
        algorithm: DigestAlgorithm,
        source: impl Read,
        seq: u64,
    ) -> std::io::Result<Self> {
        let temp = incoming_dir.join(format!("incoming-{seq}.tmp"));
        match Self::stage(fs, &temp, algorithm, source) {
            Ok((size, digest)) => Ok(Self {
                fs,
                temp: Some(temp),
                size,
                digest,
            }),
            Err(e) => {
                error!(error = %e, "error receiving blob");
                if let Err(cleanup) = fs.remove_file_if_exists(&temp) {
                    warn!(path = %temp.display(), error = %cleanup, "failed to remove staging file");
                }
                Err(e)
            }
        }
    }

    fn stage(
        fs: &MeteredFs,
        temp: &Path,
        algorithm: DigestAlgorithm,
        source: impl Read,
    ) -> std::io::Result<(u64, Vec<u8>)> {
        let file = fs.open_output(temp)?;
        let mut out = HashingWriter::new(BufWriter::new(file), algorithm);
        let size = copy_stream(source, &mut out)?;
        out.flush()?;
        let (_file, digest) = out.finalize();
        Ok((size, digest))
    }

    /// Returns the digest of the staged bytes.
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Adopts the staged file into `dest` by atomic rename, creating the
    /// destination's parent directory if needed. On failure the temp file is
    /// retained by this value and removed when it is dropped.
    pub fn move_to(mut self, dest: &Path) -> Result<()> {
        let temp = self.temp.take().expect("incoming blob was already moved");
        debug!(from = %temp.display(), to = %dest.display(), size = self.size, "move incoming blob");
        if let Some(parent) = dest.parent() {
            if let Err(e) = self.fs.ensure_dir(parent) {
                self.temp = Some(temp);
                return Err(e);
            }
        }
        match self.fs.rename_atomic(&temp, dest) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.temp = Some(temp);
                Err(e.into())
            }
        }
    }
}

impl Drop for IncomingBlob<'_> {
    fn drop(&mut self) {
        if let Some(temp) = self.temp.take() {
            if let Err(e) = self.fs.remove_file_if_exists(&temp) {
                warn!(path = %temp.display(), error = %e, "failed to remove staging file");
            }
        }
    }
}
