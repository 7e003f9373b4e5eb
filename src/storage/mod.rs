//! Storage Module
//!
//! Backends that hold cached files, and the put transaction they accept.
//!
//! ## Responsibilities
//! - Answer file lookups by (type, version)
//! - Buffer uploads in a [`PutTransaction`] until the version is committed
//! - Persist state through periodic snapshots
//!
//! ## Paged Layout
//! ```text
//! ┌──────────────────────── page 0 ─────────────────────────┐
//! │ [a: v1 asset][free 4K][i: v2 info][  free 80K ... ]     │
//! └─────────────────────────────────────────────────────────┘
//! ┌──────────────────────── page 1 ─────────────────────────┐
//! │ [r: v1 resource][a: v3 asset][      free ...      ]     │
//! └─────────────────────────────────────────────────────────┘
//! index: (type, version) → (page, offset, size, last access)
//! ```

mod index;
mod paged;
mod snapshot;
mod transaction;

use std::net::IpAddr;

use bytes::Bytes;

use crate::error::Result;
use crate::key::{FileType, VersionKey};

pub use index::{PageId, Region};
pub use paged::{PagedCache, StorageStats};
pub use snapshot::{read_snapshot, write_snapshot, Autosave};
pub use transaction::{Digest, PutTransaction, StoredFile};

/// What a backend knows about a stored file without reading it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
}

/// A store of versioned files
///
/// Implementations must be safe to share between connection threads.
pub trait CacheBackend: Send + Sync {
    /// Size of a stored file, if present
    fn get_file_info(&self, file_type: FileType, key: &VersionKey) -> Result<Option<FileInfo>>;

    /// Contents of a stored file; `CacheError::NotFound` if absent
    fn get_file(&self, file_type: FileType, key: &VersionKey) -> Result<Bytes>;

    /// Open a transaction for uploading one version
    fn create_put_transaction(&self, key: VersionKey, client: Option<IpAddr>) -> PutTransaction;

    /// Store the files of a finalized transaction if it is still valid
    fn end_put_transaction(&self, trx: PutTransaction) -> Result<()>;

    /// Persist current state
    fn save(&self) -> Result<()>;

    /// Persist and release resources
    fn shutdown(&self) -> Result<()>;
}
