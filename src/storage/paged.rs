//! Paged In-Memory Cache
//!
//! Stores file contents in large pages carved into blocks by the
//! [`BlockIndex`]. When the page budget is used up the least recently
//! accessed block large enough for a new file is evicted.
//!
//! ## Concurrency
//! - `state`: one RwLock over pages + index
//!   - reads and snapshots share it
//!   - reserve/write/release hold it exclusively, so a write waits for any
//!     snapshot in progress before touching a page
//! - access stamps and dirty flags are atomics so shared holders can update them
//! - `save_lock` keeps concurrent snapshot writers apart

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{CacheError, Result};
use crate::key::{FileKey, FileType, VersionKey};

use super::index::{BlockIndex, PageId, RecordSnapshot, Region};
use super::snapshot::{read_snapshot, write_snapshot};
use super::{CacheBackend, FileInfo, PutTransaction, StoredFile};

/// A contiguous byte region owned by the cache
struct Page {
    data: Vec<u8>,
    dirty: AtomicBool,
}

/// Everything guarded by the state lock
struct PageStore {
    pages: BTreeMap<PageId, Page>,
    index: BlockIndex,
    next_page: PageId,
}

/// On-disk form of the index
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    pages: Vec<(PageId, u64)>,
    records: Vec<RecordSnapshot>,
    clock: u64,
}

/// Point-in-time usage figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub page_count: usize,
    pub page_bytes: u64,
    pub free_blocks: usize,
    pub owned_blocks: usize,
}

impl PageStore {
    fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            index: BlockIndex::new(),
            next_page: 0,
        }
    }

    fn alloc_page(&mut self, min_size: u64, page_size: u64, now: u64) -> Result<PageId> {
        let size = min_size.max(page_size);
        let len = usize::try_from(size)
            .map_err(|_| CacheError::Storage(format!("page of {} bytes is too large", size)))?;

        let id = self.next_page;
        self.next_page += 1;
        self.pages.insert(
            id,
            Page {
                data: vec![0u8; len],
                dirty: AtomicBool::new(true),
            },
        );
        self.index.insert_free(id, 0, size, now);

        tracing::debug!("Allocated page {} ({} bytes)", id, size);
        Ok(id)
    }

    /// Find a block of exactly `size` bytes for `key`
    ///
    /// Blocks owned by `protected` are never evicted.
    fn reserve(
        &mut self,
        config: &StorageConfig,
        key: FileKey,
        size: u64,
        protected: &[FileKey],
        now: u64,
    ) -> Result<Region> {
        // A new value for a key replaces the old one
        self.index.release(&key);

        let block = loop {
            if let Some(id) = self.index.best_fit(size) {
                break id;
            }
            if self.pages.len() < config.max_page_count {
                self.alloc_page(size, config.page_size, now)?;
                continue;
            }
            match self.index.least_recently_used(size, protected) {
                Some(id) => break id,
                None => return Err(CacheError::StorageExhausted { requested: size }),
            }
        };

        let (region, evicted) = self
            .index
            .assign(block, key, size, config.min_free_block_size, now)
            .ok_or_else(|| CacheError::Storage(format!("block {} vanished", block)))?;

        if let Some(evicted) = evicted {
            tracing::debug!("Evicted {} to make room for {}", evicted, key);
        }
        Ok(region)
    }

    fn write_region(&mut self, region: Region, data: &[u8]) -> Result<()> {
        if data.len() as u64 != region.size {
            return Err(CacheError::Storage(format!(
                "write of {} bytes into a {} byte region",
                data.len(),
                region.size
            )));
        }
        let page = self
            .pages
            .get_mut(&region.page)
            .ok_or_else(|| CacheError::Storage(format!("page {} missing", region.page)))?;

        let start = region.offset as usize;
        let end = start + data.len();
        let target = page.data.get_mut(start..end).ok_or_else(|| {
            CacheError::Storage(format!("region {}..{} outside page {}", start, end, region.page))
        })?;
        target.copy_from_slice(data);
        page.dirty.store(true, Ordering::Release);
        Ok(())
    }
}

/// Paged in-memory cache backend
pub struct PagedCache {
    config: StorageConfig,
    data_dir: PathBuf,
    state: RwLock<PageStore>,
    clock: AtomicU64,
    save_lock: Mutex<()>,
}

impl PagedCache {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const INDEX_FILENAME: &'static str = "cache.db";
    const PAGE_DIR: &'static str = "pages";

    /// Open the cache, reloading the last snapshot when persistence is on
    pub fn open(config: StorageConfig, data_dir: &Path) -> Result<Self> {
        let (store, clock) = if config.persistence {
            fs::create_dir_all(data_dir.join(Self::PAGE_DIR))?;
            Self::load(data_dir)?
        } else {
            (PageStore::new(), 0)
        };

        tracing::info!(
            "Paged cache ready: {} pages, {} files",
            store.pages.len(),
            store.index.owned_block_count()
        );

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            state: RwLock::new(store),
            clock: AtomicU64::new(clock),
            save_lock: Mutex::new(()),
        })
    }

    /// Reserve a region of exactly `size` bytes for `key`
    pub fn reserve(&self, key: FileKey, size: u64) -> Result<Region> {
        let now = self.tick();
        self.state.write().reserve(&self.config, key, size, &[], now)
    }

    /// Fill a region previously reserved for `key`
    pub fn write(&self, key: FileKey, region: Region, data: &[u8]) -> Result<()> {
        let mut store = self.state.write();
        let owned = store
            .index
            .lookup(&key)
            .map(|(id, r)| id == region.block && r.page == region.page && r.offset == region.offset)
            .unwrap_or(false);
        if !owned {
            return Err(CacheError::Storage(format!(
                "region for {} is no longer owned by it",
                key
            )));
        }
        store.write_region(region, data)
    }

    /// Copy out the contents stored for `key`, updating its access time
    pub fn read(&self, key: &FileKey) -> Option<Bytes> {
        let store = self.state.read();
        let (_, record) = store.index.lookup(key)?;
        record.touch(self.tick());

        let page = store.pages.get(&record.page)?;
        let start = record.offset as usize;
        let end = start + record.size as usize;
        page.data.get(start..end).map(Bytes::copy_from_slice)
    }

    /// Update the access time of `key`
    pub fn touch(&self, key: &FileKey) -> bool {
        let store = self.state.read();
        match store.index.lookup(key) {
            Some((_, record)) => {
                record.touch(self.tick());
                true
            }
            None => false,
        }
    }

    /// Size of the file stored for `key`
    pub fn size_of(&self, key: &FileKey) -> Option<u64> {
        self.state.read().index.lookup(key).map(|(_, r)| r.size)
    }

    /// Store all files of one version
    ///
    /// Runs under a single exclusive lock. Files written earlier in the same
    /// call are never chosen for eviction. If any file cannot be placed, the
    /// files already written by this call are released again.
    pub fn put_files(&self, files: &[StoredFile]) -> Result<()> {
        let mut store = self.state.write();
        let mut written: Vec<FileKey> = Vec::with_capacity(files.len());

        for file in files {
            let key = FileKey::new(file.file_type, file.key);
            let now = self.tick();
            let result = store
                .reserve(&self.config, key, file.size, &written, now)
                .and_then(|region| store.write_region(region, &file.data));

            if let Err(e) = result {
                store.index.release(&key);
                for key in &written {
                    store.index.release(key);
                }
                return Err(e);
            }
            written.push(key);
        }
        Ok(())
    }

    /// Write dirty pages and the index to disk
    pub fn save(&self) -> Result<()> {
        if !self.config.persistence {
            return Ok(());
        }
        let _saving = self.save_lock.lock();
        let store = self.state.read();

        let page_dir = self.data_dir.join(Self::PAGE_DIR);
        fs::create_dir_all(&page_dir)?;

        let mut written = 0;
        for (id, page) in &store.pages {
            if !page.dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            if let Err(e) = fs::write(Self::page_path(&page_dir, *id), &page.data) {
                page.dirty.store(true, Ordering::Release);
                return Err(e.into());
            }
            written += 1;
        }

        let snapshot = IndexSnapshot {
            pages: store
                .pages
                .iter()
                .map(|(id, page)| (*id, page.data.len() as u64))
                .collect(),
            records: store.index.snapshot(),
            clock: self.clock.load(Ordering::SeqCst),
        };
        write_snapshot(&self.data_dir.join(Self::INDEX_FILENAME), &snapshot)?;

        tracing::debug!(
            "Saved cache snapshot: {} pages ({} dirty)",
            snapshot.pages.len(),
            written
        );
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> StorageStats {
        let store = self.state.read();
        StorageStats {
            page_count: store.pages.len(),
            page_bytes: store.pages.values().map(|p| p.data.len() as u64).sum(),
            free_blocks: store.index.free_block_count(),
            owned_blocks: store.index.owned_block_count(),
        }
    }

    /// (size, page, offset) of every free block, ascending by size
    pub fn free_blocks(&self) -> Vec<(u64, PageId, u64)> {
        self.state.read().index.free_blocks()
    }

    /// Keys of every stored file
    pub fn stored_keys(&self) -> Vec<FileKey> {
        self.state.read().index.owned_keys()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Largest file the configured pages can hold
    pub fn max_file_size(&self) -> u64 {
        self.config
            .page_size
            .saturating_mul(self.config.max_page_count as u64)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn page_path(page_dir: &Path, id: PageId) -> PathBuf {
        page_dir.join(format!("{:08}.page", id))
    }

    fn load(data_dir: &Path) -> Result<(PageStore, u64)> {
        let Some(snapshot) =
            read_snapshot::<IndexSnapshot>(&data_dir.join(Self::INDEX_FILENAME))?
        else {
            return Ok((PageStore::new(), 0));
        };

        let page_dir = data_dir.join(Self::PAGE_DIR);
        let mut store = PageStore {
            pages: BTreeMap::new(),
            index: BlockIndex::restore(snapshot.records),
            next_page: 0,
        };

        for (id, size) in snapshot.pages {
            store.next_page = store.next_page.max(id + 1);
            let path = Self::page_path(&page_dir, id);
            match fs::read(&path) {
                Ok(data) if data.len() as u64 == size => {
                    store.pages.insert(
                        id,
                        Page {
                            data,
                            dirty: AtomicBool::new(false),
                        },
                    );
                }
                Ok(data) => {
                    tracing::warn!(
                        "Dropping page {}: expected {} bytes, found {}",
                        id,
                        size,
                        data.len()
                    );
                    store.index.remove_page(id);
                }
                Err(e) => {
                    tracing::warn!("Dropping page {}: {}", id, e);
                    store.index.remove_page(id);
                }
            }
        }

        Ok((store, snapshot.clock))
    }
}

impl CacheBackend for PagedCache {
    fn get_file_info(&self, file_type: FileType, key: &VersionKey) -> Result<Option<FileInfo>> {
        Ok(self
            .size_of(&FileKey::new(file_type, *key))
            .map(|size| FileInfo { size }))
    }

    fn get_file(&self, file_type: FileType, key: &VersionKey) -> Result<Bytes> {
        self.read(&FileKey::new(file_type, *key))
            .ok_or(CacheError::NotFound)
    }

    fn create_put_transaction(&self, key: VersionKey, client: Option<IpAddr>) -> PutTransaction {
        PutTransaction::with_size_limit(key, client, self.max_file_size())
    }

    fn end_put_transaction(&self, trx: PutTransaction) -> Result<()> {
        if !trx.is_valid() {
            return Ok(());
        }
        self.put_files(trx.files())
    }

    fn save(&self) -> Result<()> {
        PagedCache::save(self)
    }

    fn shutdown(&self) -> Result<()> {
        PagedCache::save(self)
    }
}
