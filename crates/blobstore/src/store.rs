//! The content-addressable blob store.

use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use blobstore_digest::DigestAlgorithm;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    blob::Blob,
    directory::{BlobDirectory, DirContext},
    error::{Result, StoreError},
    fs::MeteredFs,
    incoming::IncomingBlob,
    metrics::{Counter, MetricRegistry, BLOB_COUNT, BYTE_COUNT},
    reference::BlobRef,
};

/// The default maximum number of blob files a hierarchy directory may hold
/// before additional content spills into subdirectories.
///
/// 256 possible subdirectories, 254 blob files, "." and ".." add up to 512
/// directory entries, which testing showed to be a decent balance between
/// tree depth and directory read speed.
pub const DEFAULT_MAX_BLOBS_PER_DIRECTORY: usize = 254;

/// A content-addressable, local-disk-backed store for binary blobs.
///
/// Blobs are arranged in a variable-depth filesystem hierarchy keyed by the
/// hexadecimal encoding of the digest of their contents. Each directory may
/// hold up to a configured number of blob files; additional blobs are stored
/// in deeper subdirectories named for the next byte of the digest. Adding
/// identical content twice stores exactly one copy.
///
/// The store is thread-safe: structural operations are serialized through an
/// internal lock, while copying blob data into the staging area (the bulk of
/// the work of [`BlobStore::add`]) runs in parallel across threads.
pub struct BlobStore {
    dir: PathBuf,
    blob_root: PathBuf,
    incoming: PathBuf,
    algorithm: DigestAlgorithm,
    max_blobs: usize,
    metrics: MetricRegistry,
    fs: MeteredFs,
    blob_count: Arc<Counter>,
    byte_count: Arc<Counter>,
    incoming_seq: AtomicU64,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    closed: bool,
}

impl BlobStore {
    /// Opens the blob store rooted at `path`, creating the directory layout
    /// if it does not exist, and scans the hierarchy to rebuild the blob and
    /// byte counters and heal any placement violations.
    ///
    /// `algorithm` is the name of the digest algorithm to use ("MD5",
    /// "SHA-1" or "SHA-256"); `max_blobs_per_directory` must be at least 1.
    /// Only this store should ever modify the contents of `path`.
    pub fn open(
        path: impl Into<PathBuf>,
        algorithm: &str,
        max_blobs_per_directory: usize,
    ) -> Result<Self> {
        let dir = path.into();
        info!(
            path = %dir.display(),
            algorithm,
            max_blobs_per_directory,
            "opening blob store"
        );
        if max_blobs_per_directory < 1 {
            return Err(StoreError::InvalidArgument(
                "max_blobs_per_directory must be greater than zero".to_string(),
            ));
        }
        let algorithm: DigestAlgorithm = algorithm.parse()?;

        let metrics = MetricRegistry::new();
        let fs = MeteredFs::new(&metrics);
        fs.ensure_dir(&dir)?;
        let blob_root = fs.ensure_dir(&dir.join("blobs"))?;
        let incoming = fs.ensure_dir(&dir.join("incoming"))?;
        let blob_count = metrics.counter(BLOB_COUNT);
        let byte_count = metrics.counter(BYTE_COUNT);

        let store = Self {
            dir,
            blob_root,
            incoming,
            algorithm,
            max_blobs: max_blobs_per_directory,
            metrics,
            fs,
            blob_count,
            byte_count,
            incoming_seq: AtomicU64::new(0),
            state: Mutex::new(State::default()),
        };
        let ctx = store.dir_ctx();
        store.root(&ctx).deep_scan_and_dedupe()?;
        Ok(store)
    }

    /// Opens a store at `path` using MD5 digests and the default maximum
    /// number of blobs per directory.
    pub fn md5(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(path, "MD5", DEFAULT_MAX_BLOBS_PER_DIRECTORY)
    }

    /// Opens a store at `path` using SHA-1 digests and the default maximum
    /// number of blobs per directory.
    pub fn sha1(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(path, "SHA-1", DEFAULT_MAX_BLOBS_PER_DIRECTORY)
    }

    /// Opens a store at `path` using SHA-256 digests and the default maximum
    /// number of blobs per directory.
    pub fn sha256(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(path, "SHA-256", DEFAULT_MAX_BLOBS_PER_DIRECTORY)
    }

    /// Copies `source` into the store and returns a handle to the stored
    /// blob.
    ///
    /// The stream is first staged to a temp file while its digest is
    /// computed; this part runs outside the store lock so concurrent adds
    /// can stream in parallel. If the store already holds the content, the
    /// staged copy is discarded and a handle to the existing blob is
    /// returned.
    pub fn add(&self, source: impl Read) -> Result<Blob> {
        self.ensure_open()?;
        let seq = self.incoming_seq.fetch_add(1, Ordering::Relaxed);
        let incoming =
            IncomingBlob::receive(&self.fs, &self.incoming, self.algorithm, source, seq)?;
        let reference = BlobRef::from_bytes(incoming.digest(), self.algorithm.digest_len())?;

        let _guard = self.lock_open()?;
        let ctx = self.dir_ctx();
        self.root(&ctx).add(&reference, incoming)
    }

    /// Copies the given bytes into the store.
    pub fn add_bytes(&self, bytes: impl AsRef<[u8]>) -> Result<Blob> {
        self.add(bytes.as_ref())
    }

    /// Copies the contents of the file at `path` into the store.
    pub fn add_file(&self, path: impl AsRef<Path>) -> Result<Blob> {
        self.add(fs_err::File::open(path.as_ref())?)
    }

    /// Returns a handle to the blob with the given identifier, or `None` if
    /// the store does not hold it.
    pub fn get(&self, id: &str) -> Result<Option<Blob>> {
        let reference = BlobRef::from_hex(id, self.algorithm.digest_len())?;
        let _guard = self.lock_open()?;
        let ctx = self.dir_ctx();
        self.root(&ctx).get(&reference)
    }

    /// Deletes the blob with the given identifier, returning whether it was
    /// present.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let reference = BlobRef::from_hex(id, self.algorithm.digest_len())?;
        let _guard = self.lock_open()?;
        let ctx = self.dir_ctx();
        self.root(&ctx).delete(&reference)
    }

    /// Returns the number of blobs currently in the store.
    pub fn blob_count(&self) -> i64 {
        self.blob_count.get()
    }

    /// Returns the total size in bytes of all blobs currently in the store.
    pub fn byte_count(&self) -> i64 {
        self.byte_count.get()
    }

    /// Returns the root directory of this store. Only the store should ever
    /// modify its contents.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Returns the digest algorithm this store was opened with.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Returns the metric registry of this store.
    pub fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    /// Closes the store, removing the staging directory. Further operations
    /// fail with [`StoreError::StoreClosed`]; closing twice is a no-op.
    ///
    /// The store is marked closed even if removing the staging directory
    /// fails; the error is still surfaced.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.closed {
            debug!(path = %self.incoming.display(), "cleaning up incoming directory");
            let result = self.fs.remove_dir_all(&self.incoming);
            state.closed = true;
            result?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        self.lock_open().map(|_| ())
    }

    fn lock_open(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        let state = self.state.lock();
        if state.closed {
            return Err(StoreError::StoreClosed);
        }
        Ok(state)
    }

    fn dir_ctx(&self) -> DirContext<'_> {
        DirContext {
            fs: &self.fs,
            blob_count: &self.blob_count,
            byte_count: &self.byte_count,
            digest_len: self.algorithm.digest_len(),
            max_blobs: self.max_blobs,
        }
    }

    // the top-level node of the hierarchy; nodes are rebuilt per operation
    fn root<'a>(&self, ctx: &'a DirContext<'a>) -> BlobDirectory<'a> {
        BlobDirectory::new(ctx, self.blob_root.clone(), String::new())
    }
}

impl Drop for BlobStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.dir.display(), error = %e, "failed to close blob store");
        }
    }
}
