//! A flat, manually keyed variant of the blob store.
//!
//! Where [`BlobStore`](crate::BlobStore) derives every identifier from the
//! content digest and balances a variable-depth hierarchy, a
//! [`KeyedBlobStore`] lets the caller choose identifiers and lays blobs out
//! in a single fixed level: `data/<first two hex digits>/<remaining hex
//! digits>`. It shares the identifier validation and the staging plus
//! atomic-move mechanics with the digest store, but none of the
//! deduplication or promotion machinery — content under a caller-chosen key
//! is whatever the caller last put there.

use std::{
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use blobstore_digest::DigestAlgorithm;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    blob::Blob,
    directory::is_valid_subdir_name,
    error::{Result, StoreError},
    fs::MeteredFs,
    incoming::{copy_stream, IncomingBlob},
    metrics::MetricRegistry,
    reference::BlobRef,
};

/// A local-disk blob store addressed by caller-supplied identifiers.
///
/// Two flavors exist:
///
/// - [`KeyedBlobStore::open`] configures a digest algorithm, so content can
///   also be inserted under its own digest via [`KeyedBlobStore::add`].
/// - [`KeyedBlobStore::open_fixed`] configures only an identifier length;
///   every insert must name its identifier via [`KeyedBlobStore::put`].
///
/// Once `put` has been used, the store permanently enters *put mode*
/// (recorded by a marker file that survives reopening): a digest can no
/// longer prove that the content stored under an identifier is current, so
/// from then on every insert overwrites its destination.
pub struct KeyedBlobStore {
    root: PathBuf,
    data: PathBuf,
    staging: PathBuf,
    put_mode_flag: PathBuf,
    algorithm: Option<DigestAlgorithm>,
    ref_len: usize,
    metrics: MetricRegistry,
    fs: MeteredFs,
    staging_seq: AtomicU64,
    put_mode: AtomicBool,
    lock: Mutex<()>,
}

impl KeyedBlobStore {
    /// Opens a keyed store at `path` with the named digest algorithm, so
    /// that [`KeyedBlobStore::add`] is available alongside
    /// [`KeyedBlobStore::put`]. Identifiers have the algorithm's digest
    /// length.
    pub fn open(path: impl Into<PathBuf>, algorithm: &str) -> Result<Self> {
        let algorithm: DigestAlgorithm = algorithm.parse()?;
        Self::open_inner(path.into(), Some(algorithm), algorithm.digest_len())
    }

    /// Opens a keyed store at `path` without a digest algorithm. All
    /// identifiers must be `ref_len` bytes (`2 * ref_len` hex characters)
    /// and every insert goes through [`KeyedBlobStore::put`]. `ref_len`
    /// must be at least 2.
    pub fn open_fixed(path: impl Into<PathBuf>, ref_len: usize) -> Result<Self> {
        if ref_len < 2 {
            return Err(StoreError::InvalidArgument(
                "fixed identifier length must be at least 2 bytes".to_string(),
            ));
        }
        Self::open_inner(path.into(), None, ref_len)
    }

    fn open_inner(
        root: PathBuf,
        algorithm: Option<DigestAlgorithm>,
        ref_len: usize,
    ) -> Result<Self> {
        info!(path = %root.display(), ref_len, "opening keyed blob store");
        let metrics = MetricRegistry::new();
        let fs = MeteredFs::new(&metrics);
        fs.ensure_dir(&root)?;
        let data = fs.ensure_dir(&root.join("data"))?;
        let staging = fs.ensure_dir(&root.join(".staging"))?;
        let flags = fs.ensure_dir(&root.join(".flags"))?;
        let put_mode_flag = flags.join("put");
        let put_mode = fs.exists(&put_mode_flag);

        Ok(Self {
            root,
            data,
            staging,
            put_mode_flag,
            algorithm,
            ref_len,
            metrics,
            fs,
            staging_seq: AtomicU64::new(0),
            put_mode: AtomicBool::new(put_mode),
            lock: Mutex::new(()),
        })
    }

    /// Copies `source` into the store under the digest of its bytes.
    ///
    /// Outside put mode, content whose destination already exists is assumed
    /// current and the staged copy is discarded; in put mode the destination
    /// is always overwritten. Fails with
    /// [`StoreError::InvalidArgument`] on a store opened without a digest
    /// algorithm.
    pub fn add(&self, source: impl Read) -> Result<Blob> {
        let Some(algorithm) = self.algorithm else {
            return Err(StoreError::InvalidArgument(
                "no digest algorithm is configured for this store; insert with put() instead"
                    .to_string(),
            ));
        };
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let incoming = IncomingBlob::receive(&self.fs, &self.staging, algorithm, source, seq)?;
        let reference = BlobRef::from_bytes(incoming.digest(), self.ref_len)?;

        let _guard = self.lock.lock();
        let dest = self.resolve(&reference);
        if self.put_mode.load(Ordering::Relaxed) || !self.fs.exists(&dest) {
            incoming.move_to(&dest)?;
        }
        Blob::new(&reference, dest, &self.fs)
    }

    /// Copies `source` into the store under the caller-chosen identifier,
    /// overwriting whatever was stored there. Permanently raises put mode.
    pub fn put(&self, id: &str, source: impl Read) -> Result<Blob> {
        let reference = BlobRef::from_hex(id, self.ref_len)?;
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let staged = StagedFile::receive(&self.fs, &self.staging, source, seq)?;

        let _guard = self.lock.lock();
        self.enable_put_mode()?;
        let dest = self.resolve(&reference);
        staged.move_to(&dest)?;
        Blob::new(&reference, dest, &self.fs)
    }

    /// Returns a handle to the blob stored under `id`, or `None`.
    pub fn get(&self, id: &str) -> Result<Option<Blob>> {
        let reference = BlobRef::from_hex(id, self.ref_len)?;
        let _guard = self.lock.lock();
        let dest = self.resolve(&reference);
        if self.fs.exists(&dest) {
            Blob::new(&reference, dest, &self.fs).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Deletes the blob stored under `id`, returning whether it was present.
    /// A parent directory left empty is removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let reference = BlobRef::from_hex(id, self.ref_len)?;
        let _guard = self.lock.lock();
        let dest = self.resolve(&reference);
        let removed = self.fs.remove_file_if_exists(&dest)?;
        if removed {
            if let Some(parent) = dest.parent() {
                self.fs.remove_dir_if_empty(parent)?;
            }
        }
        Ok(removed)
    }

    /// Returns the identifiers of every blob in the store, sorted.
    pub fn refs(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock();
        let mut ids = Vec::new();
        for entry in self.fs.read_dir(&self.data)? {
            let entry = entry?;
            let Ok(parent_name) = entry.file_name().into_string() else {
                continue;
            };
            if !entry.file_type()?.is_dir() || !is_valid_subdir_name(&parent_name) {
                continue;
            }
            for child in self.fs.read_dir(&entry.path())? {
                let child = child?;
                let Ok(name) = child.file_name().into_string() else {
                    continue;
                };
                if !child.file_type()?.is_file() {
                    continue;
                }
                let id = format!("{parent_name}{name}");
                if BlobRef::from_hex(&id, self.ref_len).is_ok() {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Returns the root directory of this store. Only the store should ever
    /// modify its contents.
    pub fn directory(&self) -> &Path {
        &self.root
    }

    /// Returns the metric registry of this store.
    pub fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    fn resolve(&self, reference: &BlobRef) -> PathBuf {
        let id = reference.id();
        self.data.join(&id[..2]).join(&id[2..])
    }

    fn enable_put_mode(&self) -> Result<()> {
        if !self.put_mode.swap(true, Ordering::Relaxed) {
            debug!(path = %self.put_mode_flag.display(), "entering put mode");
            self.fs.open_output(&self.put_mode_flag)?;
        }
        Ok(())
    }
}

/// A scoped staging temp without digest computation, for manually keyed
/// inserts. Deleted on drop unless adopted by [`StagedFile::move_to`].
struct StagedFile<'a> {
    fs: &'a MeteredFs,
    path: Option<PathBuf>,
}

impl<'a> StagedFile<'a> {
    fn receive(
        fs: &'a MeteredFs,
        staging_dir: &Path,
        source: impl Read,
        seq: u64,
    ) -> std::io::Result<Self> {
        let path = staging_dir.join(format!("staging-{seq}.tmp"));
        let mut out = BufWriter::new(fs.open_output(&path)?);
        match copy_stream(source, &mut out).and_then(|_| out.flush()) {
            Ok(()) => Ok(Self {
                fs,
                path: Some(path),
            }),
            Err(e) => {
                let _ = fs.remove_file_if_exists(&path);
                Err(e)
            }
        }
    }

    fn move_to(mut self, dest: &Path) -> Result<()> {
        let path = self.path.take().expect("staged file was already moved");
        if let Some(parent) = dest.parent() {
            if let Err(e) = self.fs.ensure_dir(parent) {
                self.path = Some(path);
                return Err(e);
            }
        }
        match self.fs.rename_atomic(&path, dest) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.path = Some(path);
                Err(e.into())
            }
        }
    }
}

impl Drop for StagedFile<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = self.fs.remove_file_if_exists(&path);
        }
    }
}
