//! Metered filesystem helpers.
//!
//! Every filesystem touch the store makes goes through [`MeteredFs`], which
//! wraps `fs-err` (so errors carry the offending path) and counts each
//! operation in the store's [`MetricRegistry`](crate::MetricRegistry).

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    error::{Result, StoreError},
    metrics::{Counter, MetricRegistry},
};

/// Filesystem operations wrapped with per-operation counters.
#[derive(Debug)]
pub(crate) struct MeteredFs {
    exists: Arc<Counter>,
    create_dir_all: Arc<Counter>,
    is_dir: Arc<Counter>,
    read_dir: Arc<Counter>,
    remove_file: Arc<Counter>,
    open_output: Arc<Counter>,
    size: Arc<Counter>,
    rename_atomic: Arc<Counter>,
    remove_dir: Arc<Counter>,
    remove_dir_all: Arc<Counter>,
}

impl MeteredFs {
    /// Creates the helpers, registering one counter per wrapped operation.
    pub fn new(metrics: &MetricRegistry) -> Self {
        Self {
            exists: metrics.counter("fs.exists"),
            create_dir_all: metrics.counter("fs.create_dir_all"),
            is_dir: metrics.counter("fs.is_dir"),
            read_dir: metrics.counter("fs.read_dir"),
            remove_file: metrics.counter("fs.remove_file"),
            open_output: metrics.counter("fs.open_output"),
            size: metrics.counter("fs.size"),
            rename_atomic: metrics.counter("fs.rename_atomic"),
            remove_dir: metrics.counter("fs.remove_dir"),
            remove_dir_all: metrics.counter("fs.remove_dir_all"),
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.exists.inc();
        path.exists()
    }

    pub fn create_dir_all(&self, dir: &Path) -> std::io::Result<()> {
        self.create_dir_all.inc();
        fs_err::create_dir_all(dir)
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.is_dir.inc();
        path.is_dir()
    }

    pub fn read_dir(&self, dir: &Path) -> std::io::Result<fs_err::ReadDir> {
        self.read_dir.inc();
        fs_err::read_dir(dir)
    }

    /// Deletes the file at `path`, returning whether it existed.
    pub fn remove_file_if_exists(&self, path: &Path) -> std::io::Result<bool> {
        self.remove_file.inc();
        match fs_err::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Opens `path` for writing, creating it if absent and truncating it
    /// otherwise.
    pub fn open_output(&self, path: &Path) -> std::io::Result<fs_err::File> {
        self.open_output.inc();
        fs_err::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }

    /// Returns the size in bytes of the file at `path`.
    pub fn size(&self, path: &Path) -> std::io::Result<u64> {
        self.size.inc();
        Ok(fs_err::metadata(path)?.len())
    }

    /// Atomically renames `from` to `to`. Both paths must live on the same
    /// filesystem; the destination either appears fully or not at all.
    pub fn rename_atomic(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        self.rename_atomic.inc();
        fs_err::rename(from, to)
    }

    /// Deletes `dir` if it is an empty directory, returning whether it was
    /// deleted.
    pub fn remove_dir_if_empty(&self, dir: &Path) -> std::io::Result<bool> {
        if !self.is_dir(dir) {
            return Ok(false);
        }
        if self.read_dir(dir)?.next().is_some() {
            return Ok(false);
        }
        self.remove_dir.inc();
        fs_err::remove_dir(dir)?;
        Ok(true)
    }

    /// Recursively deletes `dir` and everything beneath it. A missing tree
    /// is treated as success.
    pub fn remove_dir_all(&self, dir: &Path) -> std::io::Result<()> {
        if !self.exists(dir) {
            return Ok(());
        }
        self.remove_dir_all.inc();
        fs_err::remove_dir_all(dir)
    }

    /// Ensures `dir` exists as a directory, creating it (and any missing
    /// parents) if needed.
    pub fn ensure_dir(&self, dir: &Path) -> Result<PathBuf> {
        if !self.exists(dir) {
            self.create_dir_all(dir)?;
        }
        if !self.is_dir(dir) {
            return Err(StoreError::NotADirectory(dir.to_path_buf()));
        }
        Ok(dir.to_path_buf())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn metered() -> (MetricRegistry, MeteredFs) {
        let metrics = MetricRegistry::new();
        let fs = MeteredFs::new(&metrics);
        (metrics, fs)
    }

    #[test]
    fn test_ensure_dir_creates_missing_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let (metrics, fs) = metered();

        let dir = tmp.path().join("a/b/c");
        fs.ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());

        // idempotent on an existing directory
        fs.ensure_dir(&dir).unwrap();
        assert_eq!(metrics.value("fs.create_dir_all"), Some(1));
    }

    #[test]
    fn test_ensure_dir_rejects_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, fs) = metered();

        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            fs.ensure_dir(&file),
            Err(StoreError::NotADirectory(p)) if p == file
        ));
    }

    #[test]
    fn test_remove_file_if_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let (metrics, fs) = metered();

        let file = tmp.path().join("victim");
        std::fs::write(&file, b"x").unwrap();
        assert!(fs.remove_file_if_exists(&file).unwrap());
        assert!(!fs.remove_file_if_exists(&file).unwrap());
        assert_eq!(metrics.value("fs.remove_file"), Some(2));
    }

    #[test]
    fn test_remove_dir_if_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, fs) = metered();

        let dir = tmp.path().join("d");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("f"), b"x").unwrap();
        assert!(!fs.remove_dir_if_empty(&dir).unwrap());

        std::fs::remove_file(dir.join("f")).unwrap();
        assert!(fs.remove_dir_if_empty(&dir).unwrap());
        assert!(!dir.exists());
        assert!(!fs.remove_dir_if_empty(&dir).unwrap());
    }

    #[test]
    fn test_remove_dir_all_tolerates_missing_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, fs) = metered();

        let dir = tmp.path().join("tree");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested/f"), b"x").unwrap();
        fs.remove_dir_all(&dir).unwrap();
        assert!(!dir.exists());
        fs.remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_size_and_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, fs) = metered();

        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        std::fs::write(&from, b"hello").unwrap();
        assert_eq!(fs.size(&from).unwrap(), 5);

        fs.rename_atomic(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs.size(&to).unwrap(), 5);
    }
}
