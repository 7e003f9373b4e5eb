//! Block Index
//!
//! Tracks every block of every page, owned or free.
//!
//! ## Structure
//! - `records`: block id → record (page, offset, size, owner, last access)
//! - `free`: (size, block id) for unowned blocks, ascending, so the first
//!   entry at or above a requested size is the best fit
//! - `owners`: file key → block id for owned blocks
//!
//! Adjacent free blocks are never merged.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::key::FileKey;

pub type PageId = u32;
pub type BlockId = u64;

/// One block of a page
#[derive(Debug)]
pub struct IndexRecord {
    pub page: PageId,
    pub offset: u64,
    pub size: u64,
    pub owner: Option<FileKey>,
    /// Logical access time; touched under a shared lock
    last_access: AtomicU64,
}

impl IndexRecord {
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn touch(&self, now: u64) {
        self.last_access.store(now, Ordering::Relaxed);
    }
}

/// Location of a reserved block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub block: BlockId,
    pub page: PageId,
    pub offset: u64,
    pub size: u64,
}

/// Serializable form of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: BlockId,
    pub page: PageId,
    pub offset: u64,
    pub size: u64,
    pub owner: Option<FileKey>,
    pub last_access: u64,
}

/// All blocks of all pages
#[derive(Debug, Default)]
pub struct BlockIndex {
    records: HashMap<BlockId, IndexRecord>,
    free: BTreeSet<(u64, BlockId)>,
    owners: HashMap<FileKey, BlockId>,
    next_block: BlockId,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new free block
    pub fn insert_free(&mut self, page: PageId, offset: u64, size: u64, now: u64) -> BlockId {
        let id = self.next_block;
        self.next_block += 1;
        self.records.insert(
            id,
            IndexRecord {
                page,
                offset,
                size,
                owner: None,
                last_access: AtomicU64::new(now),
            },
        );
        self.free.insert((size, id));
        id
    }

    /// Record currently owned by `key`
    pub fn lookup(&self, key: &FileKey) -> Option<(BlockId, &IndexRecord)> {
        let id = *self.owners.get(key)?;
        self.records.get(&id).map(|record| (id, record))
    }

    /// Return the block owned by `key` to the free list
    pub fn release(&mut self, key: &FileKey) -> bool {
        let Some(id) = self.owners.remove(key) else {
            return false;
        };
        if let Some(record) = self.records.get_mut(&id) {
            record.owner = None;
            self.free.insert((record.size, id));
        }
        true
    }

    /// Smallest free block of at least `size` bytes
    pub fn best_fit(&self, size: u64) -> Option<BlockId> {
        self.free.range((size, 0)..).next().map(|&(_, id)| id)
    }

    /// Least recently accessed owned block of at least `size` bytes, skipping
    /// blocks owned by any of `exclude`
    pub fn least_recently_used(&self, size: u64, exclude: &[FileKey]) -> Option<BlockId> {
        self.owners
            .iter()
            .filter(|(key, _)| !exclude.contains(*key))
            .filter_map(|(_, id)| self.records.get(id).map(|record| (*id, record)))
            .filter(|(_, record)| record.size >= size)
            .min_by_key(|(id, record)| (record.last_access(), *id))
            .map(|(id, _)| id)
    }

    /// Hand block `id` to `key`, splitting off the excess
    ///
    /// The block may be free or owned (eviction). Any excess of at least
    /// `min_remainder` bytes stays behind as a free block right after the
    /// assigned region; a smaller excess is left untracked.
    pub fn assign(
        &mut self,
        id: BlockId,
        key: FileKey,
        size: u64,
        min_remainder: u64,
        now: u64,
    ) -> Option<(Region, Option<FileKey>)> {
        let record = self.records.get_mut(&id)?;
        let evicted = record.owner.take();
        if let Some(previous) = &evicted {
            self.owners.remove(previous);
        } else {
            self.free.remove(&(record.size, id));
        }

        let excess = record.size - size;
        let (page, offset) = (record.page, record.offset);

        record.size = size;
        record.owner = Some(key);
        record.touch(now);
        self.owners.insert(key, id);

        if excess > 0 && excess >= min_remainder {
            self.insert_free(page, offset + size, excess, now);
        }

        Some((
            Region {
                block: id,
                page,
                offset,
                size,
            },
            evicted,
        ))
    }

    pub fn free_block_count(&self) -> usize {
        self.free.len()
    }

    pub fn owned_block_count(&self) -> usize {
        self.owners.len()
    }

    /// (size, page, offset) of every free block, ascending by size
    pub fn free_blocks(&self) -> Vec<(u64, PageId, u64)> {
        self.free
            .iter()
            .filter_map(|(size, id)| self.records.get(id).map(|r| (*size, r.page, r.offset)))
            .collect()
    }

    pub fn owned_keys(&self) -> Vec<FileKey> {
        self.owners.keys().copied().collect()
    }

    /// Drop every block on `page`
    pub fn remove_page(&mut self, page: PageId) {
        let ids: Vec<BlockId> = self
            .records
            .iter()
            .filter(|(_, r)| r.page == page)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(record) = self.records.remove(&id) {
                match record.owner {
                    Some(owner) => {
                        self.owners.remove(&owner);
                    }
                    None => {
                        self.free.remove(&(record.size, id));
                    }
                }
            }
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn snapshot(&self) -> Vec<RecordSnapshot> {
        let mut records: Vec<RecordSnapshot> = self
            .records
            .iter()
            .map(|(id, r)| RecordSnapshot {
                id: *id,
                page: r.page,
                offset: r.offset,
                size: r.size,
                owner: r.owner,
                last_access: r.last_access(),
            })
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn restore(records: Vec<RecordSnapshot>) -> Self {
        let mut index = Self::new();
        for r in records {
            index.next_block = index.next_block.max(r.id + 1);
            match r.owner {
                Some(owner) => {
                    index.owners.insert(owner, r.id);
                }
                None => {
                    index.free.insert((r.size, r.id));
                }
            }
            index.records.insert(
                r.id,
                IndexRecord {
                    page: r.page,
                    offset: r.offset,
                    size: r.size,
                    owner: r.owner,
                    last_access: AtomicU64::new(r.last_access),
                },
            );
        }
        index
    }
}
