//! In-process counters for store observability.
//!
//! Every store owns a [`MetricRegistry`] mapping counter names to
//! monotonically updated signed 64-bit values. Two counters describe the
//! store contents ([`BLOB_COUNT`] and [`BYTE_COUNT`]); the rest track how
//! often each wrapped filesystem operation ran. Counter values are never
//! part of the on-disk state.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use fxhash::FxHashMap;
use parking_lot::Mutex;

/// Name of the counter holding the number of visible blobs in a store.
pub const BLOB_COUNT: &str = "blobCount";

/// Name of the counter holding the total size in bytes of all visible blobs.
pub const BYTE_COUNT: &str = "byteCount";

/// A signed 64-bit counter that can be shared across threads.
#[derive(Debug, Default)]
pub struct Counter(AtomicI64);

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Increments the counter by `n`.
    pub fn inc_by(&self, n: i64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Decrements the counter by one.
    pub fn dec(&self) {
        self.dec_by(1);
    }

    /// Decrements the counter by `n`.
    pub fn dec_by(&self, n: i64) {
        self.0.fetch_sub(n, Ordering::Relaxed);
    }

    /// Returns the current value of the counter.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A registry of named [`Counter`]s.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    counters: Mutex<FxHashMap<String, Arc<Counter>>>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter registered under `name`, creating it at zero if
    /// it does not exist yet.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        let mut counters = self.counters.lock();
        if let Some(counter) = counters.get(name) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::default());
        counters.insert(name.to_string(), Arc::clone(&counter));
        counter
    }

    /// Returns the current value of the counter registered under `name`, or
    /// `None` if no such counter exists.
    pub fn value(&self, name: &str) -> Option<i64> {
        self.counters.lock().get(name).map(|c| c.get())
    }

    /// Returns a point-in-time snapshot of every counter, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        let mut entries: Vec<_> = self
            .counters
            .lock()
            .iter()
            .map(|(name, counter)| (name.clone(), counter.get()))
            .collect();
        entries.sort();
        entries
    }
}
