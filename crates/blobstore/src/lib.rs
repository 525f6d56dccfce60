#![deny(missing_docs)]

//! A content-addressable, local-disk-backed store for binary blobs.
//!
//! # Architecture
//!
//! Every blob is identified by the digest of its bytes under the algorithm
//! the store was opened with (MD5, SHA-1 or SHA-256). On disk, blobs live in
//! a self-balancing, variable-depth hierarchy keyed by the hex prefix of the
//! identifier:
//!
//! ```text
//! <root>/
//!   blobs/                      hierarchy root
//!     <2D hex chars>.blob       while the directory has a vacancy...
//!     <2 hex chars>/            ...then overflow descends one digest byte
//!       <2D hex chars>.blob
//!       <2 hex chars>/
//!         ...
//!   incoming/                   staging area, cleared on clean shutdown
//!     incoming-<n>.tmp
//! ```
//!
//! A blob is always placed at the *shallowest* directory on its digest path
//! that holds fewer than the configured maximum of blob files (default 254).
//! Opening a store scans the hierarchy once to rebuild the blob and byte
//! counters, delete any copy shadowed by a shallower one, and prune empty
//! directories.
//!
//! # Components
//!
//! - [`BlobStore`]: the digest-addressed store — `add`, `get`, `delete`,
//!   counters, `close`.
//! - [`Blob`]: a handle to stored content with its identifier, size and a
//!   stream factory.
//! - [`BlobRef`]: a validated identifier in raw-byte and lowercase-hex form.
//! - [`KeyedBlobStore`]: a flat secondary store addressed by caller-chosen
//!   identifiers, without the deduplicating hierarchy.
//! - [`MetricRegistry`]: named counters tracking store contents and every
//!   wrapped filesystem operation.
//!
//! # Usage
//!
//! ```no_run
//! use blobstore::BlobStore;
//!
//! let store = BlobStore::sha256("/var/lib/myapp/blobs")?;
//! let blob = store.add_bytes(b"Hello, world!")?;
//! println!("stored {} ({} bytes)", blob.id(), blob.size());
//!
//! assert!(store.get(blob.id())?.is_some());
//! store.close()?;
//! # Ok::<(), blobstore::StoreError>(())
//! ```
//!
//! # Deduplication
//!
//! Adding identical content twice is idempotent: the second add finds the
//! existing file, discards its staged copy and returns a handle to the
//! stored blob. Content is staged (and its digest computed) outside the
//! store lock, so concurrent adds stream in parallel; only the hierarchy
//! mutation is serialized.

mod blob;
mod directory;
mod error;
mod fs;
mod incoming;
mod keyed;
mod metrics;
mod reference;
mod store;

pub use blob::Blob;
pub use blobstore_digest::DigestAlgorithm;
pub use error::{Result, StoreError};
pub use keyed::KeyedBlobStore;
pub use metrics::{Counter, MetricRegistry, BLOB_COUNT, BYTE_COUNT};
pub use reference::BlobRef;
pub use store::{BlobStore, DEFAULT_MAX_BLOBS_PER_DIRECTORY};
