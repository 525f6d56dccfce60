//! One node of the on-disk blob hierarchy.
//!
//! A [`BlobDirectory`] wraps a single filesystem directory at some prefix
//! depth. Nodes are built fresh for every store operation and never survive
//! a deep scan; they lazily read their directory once and cache the blob
//! files and subdirectories found there.

use std::path::PathBuf;

use fxhash::FxHashSet;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::{
    blob::Blob,
    error::Result,
    fs::MeteredFs,
    incoming::IncomingBlob,
    metrics::Counter,
    reference::BlobRef,
};

// blob subdirectories are always two-character lowercase hexadecimal
static SUBDIR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[0-9a-f]{2}$").expect("subdirectory pattern is valid"));

/// Context shared by every node of one store's hierarchy.
pub(crate) struct DirContext<'a> {
    pub fs: &'a MeteredFs,
    pub blob_count: &'a Counter,
    pub byte_count: &'a Counter,
    pub digest_len: usize,
    pub max_blobs: usize,
}

/// A single layer of the blob filesystem hierarchy.
pub(crate) struct BlobDirectory<'a> {
    ctx: &'a DirContext<'a>,
    dir: PathBuf,
    depth: usize,
    prefix: String,
    file_pattern: Regex,
    blobs: FxHashSet<PathBuf>,
    subdirs: FxHashSet<PathBuf>,
    loaded: bool,
}

impl<'a> BlobDirectory<'a> {
    /// Creates a node over `dir`. `prefix` is the concatenation of the
    /// two-hex-digit names of every directory between the hierarchy root and
    /// `dir`; the root itself has an empty prefix.
    pub fn new(ctx: &'a DirContext<'a>, dir: PathBuf, prefix: String) -> Self {
        let depth = prefix.len() / 2;
        // every blob file here starts with the prefix and spells out the
        // remaining digest digits
        let remaining = (ctx.digest_len * 2).saturating_sub(prefix.len());
        let file_pattern = Regex::new(&format!("^{prefix}[0-9a-f]{{{remaining}}}\\.blob$"))
            .expect("blob filename pattern is valid");
        Self {
            ctx,
            dir,
            depth,
            prefix,
            file_pattern,
            blobs: FxHashSet::default(),
            subdirs: FxHashSet::default(),
            loaded: false,
        }
    }

    /// Adds a staged blob under `reference`, placing it at the shallowest
    /// non-full directory. Re-adding existing content returns a handle to
    /// the already stored blob and discards the staged copy.
    pub fn add(&mut self, reference: &BlobRef, incoming: IncomingBlob<'_>) -> Result<Blob> {
        self.read_dir()?;
        let path = self.resolve(reference);

        // already present: the staged copy is dropped (and its temp file
        // deleted) when `incoming` goes out of scope
        if self.blobs.contains(&path) {
            return Blob::new(reference, path, self.ctx.fs);
        }

        if !self.is_full() {
            incoming.move_to(&path)?;
            self.blobs.insert(path.clone());
            let blob = Blob::new(reference, path, self.ctx.fs)?;
            self.ctx.blob_count.inc();
            self.ctx.byte_count.inc_by(blob.size() as i64);

            // a vacancy here promoted the blob above any copy that a deeper
            // directory may still hold; remove it
            if let Some(mut child) = self.descend(reference, false)? {
                child.delete(reference)?;
            }
            return Ok(blob);
        }

        self.descend(reference, true)?
            .expect("child directory exists after create")
            .add(reference, incoming)
    }

    /// Looks up `reference`, returning a handle to the shallowest copy.
    pub fn get(&mut self, reference: &BlobRef) -> Result<Option<Blob>> {
        self.read_dir()?;
        let path = self.resolve(reference);
        if self.blobs.contains(&path) {
            return Blob::new(reference, path, self.ctx.fs).map(Some);
        }
        match self.descend(reference, false)? {
            Some(mut child) => child.get(reference),
            None => Ok(None),
        }
    }

    /// Deletes every copy of `reference` at this level and below, returning
    /// whether any file was removed.
    pub fn delete(&mut self, reference: &BlobRef) -> Result<bool> {
        self.read_dir()?;
        let path = self.resolve(reference);
        let mut removed = false;

        if self.blobs.contains(&path) {
            let size = match self.ctx.fs.size(&path) {
                Ok(size) => size,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "unable to determine blob size; byte count may drift"
                    );
                    0
                }
            };
            if self.ctx.fs.remove_file_if_exists(&path)? {
                self.blobs.remove(&path);
                self.ctx.blob_count.dec();
                self.ctx.byte_count.dec_by(size as i64);
                removed = true;
            }
        }

        if let Some(mut child) = self.descend(reference, false)? {
            removed |= child.delete(reference)?;
        }

        // prune after the descent so a chain emptied by this delete
        // collapses bottom-up; the top-level directory is never removed
        if removed && self.depth > 0 {
            self.ctx.fs.remove_dir_if_empty(&self.dir)?;
        }
        Ok(removed)
    }

    /// Rebuilds the store counters from disk, deletes any blob that also
    /// exists at a shallower level, and prunes empty directories. Must only
    /// be called on the top-level node; every other node instance is stale
    /// once this returns.
    pub fn deep_scan_and_dedupe(&mut self) -> Result<()> {
        self.ctx.blob_count.dec_by(self.ctx.blob_count.get());
        self.ctx.byte_count.dec_by(self.ctx.byte_count.get());
        self.scan(None)
    }

    fn scan(&mut self, parent: Option<&SeenRefs<'_>>) -> Result<()> {
        let mut seen = SeenRefs::new(parent);
        self.read_dir()?;

        for path in &self.blobs {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .expect("blob file names are valid utf-8");
            let reference =
                BlobRef::from_hex(&name[..self.ctx.digest_len * 2], self.ctx.digest_len)?;
            if seen.contains(&reference) {
                // a shallower directory already holds this blob
                warn!(path = %path.display(), "deleting duplicate blob");
                if let Err(e) = self.ctx.fs.remove_file_if_exists(path) {
                    warn!(path = %path.display(), error = %e, "failed to delete duplicate blob");
                }
            } else {
                let size = self.ctx.fs.size(path)?;
                seen.insert(reference);
                self.ctx.blob_count.inc();
                self.ctx.byte_count.inc_by(size as i64);
            }
        }

        for subdir in &self.subdirs {
            let name = subdir
                .file_name()
                .and_then(|n| n.to_str())
                .expect("subdirectory names are valid utf-8");
            let mut child =
                BlobDirectory::new(self.ctx, subdir.clone(), format!("{}{}", self.prefix, name));
            child.scan(Some(&seen))?;
        }

        if self.depth > 0 {
            self.ctx.fs.remove_dir_if_empty(&self.dir)?;
        }
        Ok(())
    }

    /// Returns the node for the next level of `reference`'s path, optionally
    /// creating the directory. Returns `None` if the child directory does
    /// not exist.
    fn descend(&mut self, reference: &BlobRef, create: bool) -> Result<Option<BlobDirectory<'a>>> {
        if self.depth >= self.ctx.digest_len {
            // the prefix already spells the entire digest
            return Ok(None);
        }
        let next = format!("{:02x}", reference.digest()[self.depth]);
        let path = self.dir.join(&next);
        if create {
            self.ctx.fs.ensure_dir(&path)?;
        }
        if self.loaded {
            self.subdirs.insert(path.clone());
        }
        if self.ctx.fs.is_dir(&path) {
            Ok(Some(BlobDirectory::new(
                self.ctx,
                path,
                format!("{}{}", self.prefix, next),
            )))
        } else {
            Ok(None)
        }
    }

    /// Reads the directory contents once, noting blob files and
    /// subdirectories and ignoring everything else.
    fn read_dir(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        for entry in self.ctx.fs.read_dir(&self.dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let file_type = entry.file_type()?;
            if is_valid_subdir_name(&name) && file_type.is_dir() {
                self.subdirs.insert(entry.path());
            } else if self.is_valid_file_name(&name) && file_type.is_file() {
                self.blobs.insert(entry.path());
            }
        }
        self.loaded = true;
        Ok(())
    }

    fn resolve(&self, reference: &BlobRef) -> PathBuf {
        self.dir.join(format!("{}.blob", reference.id()))
    }

    fn is_full(&self) -> bool {
        self.blobs.len() >= self.ctx.max_blobs
    }

    fn is_valid_file_name(&self, name: &str) -> bool {
        self.file_pattern.is_match(name)
    }
}

pub(crate) fn is_valid_subdir_name(name: &str) -> bool {
    SUBDIR_PATTERN.is_match(name)
}

/// The seen-set used by the deep scan: `contains` answers "present here or
/// in any ancestor directory", while `insert` only ever appends to the local
/// layer. Implemented as a parent-linked chain so the ancestor sets are
/// never copied.
struct SeenRefs<'a> {
    local: FxHashSet<BlobRef>,
    parent: Option<&'a SeenRefs<'a>>,
}

impl<'a> SeenRefs<'a> {
    fn new(parent: Option<&'a SeenRefs<'a>>) -> Self {
        Self {
            local: FxHashSet::default(),
            parent,
        }
    }

    fn contains(&self, reference: &BlobRef) -> bool {
        self.local.contains(reference) || self.parent.is_some_and(|p| p.contains(reference))
    }

    fn insert(&mut self, reference: BlobRef) {
        self.local.insert(reference);
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::metrics::MetricRegistry;

    const MD5_LEN: usize = 16;

    fn context<'a>(
        fs: &'a MeteredFs,
        blob_count: &'a Counter,
        byte_count: &'a Counter,
    ) -> DirContext<'a> {
        DirContext {
            fs,
            blob_count,
            byte_count,
            digest_len: MD5_LEN,
            max_blobs: 254,
        }
    }

    #[test]
    fn test_valid_file_names_at_depth_two() {
        let metrics = MetricRegistry::new();
        let fs = MeteredFs::new(&metrics);
        let (blob_count, byte_count) = (Counter::default(), Counter::default());
        let ctx = context(&fs, &blob_count, &byte_count);
        let dir = BlobDirectory::new(&ctx, PathBuf::from("/unused"), "d021".to_string());

        assert!(dir.is_valid_file_name("d021d1bc9c32c0a73d8672c9783cb7bf.blob"));
        assert!(!dir.is_valid_file_name("a021d1bc9c32c0a73d8672c9783cb7bf.blob")); // wrong prefix
        assert!(!dir.is_valid_file_name("d021d1bc9c32c0a73d8672c9783cb7bf0.blob")); // too long
        assert!(!dir.is_valid_file_name("d021d1bc9c32c0a73d8672c9783cb7b.blob")); // too short
        assert!(!dir.is_valid_file_name("d021d1bc9c32c0a73d8672c9783cb7bf")); // no extension
        assert!(!dir.is_valid_file_name("d021d1bc9c32c0a73d8672c9783cb7bf.BLOB")); // uppercase extension
        assert!(!dir.is_valid_file_name("D021d1bc9c32c0a73d8672c9783cb7bf.blob")); // uppercase hex
        assert!(!dir.is_valid_file_name("d021D1bc9c32c0a73d8672c9783cb7bf.blob")); // uppercase hex later
        assert!(!dir.is_valid_file_name(" d021d1bc9c32c0a73d8672c9783cb7bf.blob")); // leading space
        assert!(!dir.is_valid_file_name("d021d1bc9c32c0a73d8672c9783cb7bf.blob ")); // trailing space
    }

    #[rstest]
    #[case("aa", true)]
    #[case("09", true)]
    #[case("aaa", false)]
    #[case("a", false)]
    #[case("aA", false)]
    #[case("xx", false)]
    #[case(" aa", false)]
    #[case("aa ", false)]
    #[case("", false)]
    fn test_valid_subdir_names(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_valid_subdir_name(name), expected);
    }

    #[test]
    fn test_resolve_appends_extension() {
        let metrics = MetricRegistry::new();
        let fs = MeteredFs::new(&metrics);
        let (blob_count, byte_count) = (Counter::default(), Counter::default());
        let ctx = context(&fs, &blob_count, &byte_count);
        let dir = BlobDirectory::new(&ctx, PathBuf::from("/store/blobs"), String::new());

        let reference = BlobRef::from_hex("d021d1bc9c32c0a73d8672c9783cb7bf", MD5_LEN).unwrap();
        assert_eq!(
            dir.resolve(&reference),
            PathBuf::from("/store/blobs/d021d1bc9c32c0a73d8672c9783cb7bf.blob")
        );
    }

    #[test]
    fn test_seen_refs_chain() {
        let a = BlobRef::from_hex("00000000000000000000000000000000", MD5_LEN).unwrap();
        let b = BlobRef::from_hex("11111111111111111111111111111111", MD5_LEN).unwrap();
        let c = BlobRef::from_hex("22222222222222222222222222222222", MD5_LEN).unwrap();

        let mut top = SeenRefs::new(None);
        top.insert(a.clone());

        let mut mid = SeenRefs::new(Some(&top));
        mid.insert(b.clone());

        // contains walks the ancestor chain
        assert!(mid.contains(&a));
        assert!(mid.contains(&b));
        assert!(!mid.contains(&c));

        // inserts never leak upward
        assert!(!top.contains(&b));
    }
}
