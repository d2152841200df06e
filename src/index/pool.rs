//! Bounded block cache for the B-tree writer.
//!
//! Blocks live in a small set of slots. Recency is tracked by an LRU map from
//! file position to slot; eviction takes the least recently used block that
//! is neither the current leaf nor pinned, writing it back when dirty.

use crate::error::{BuildError, Result};
use crate::spec::header::DEL;
use lru::LruCache;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Bytes of block memory the pool aims for.
const POOL_BYTES: usize = 65536;
const MIN_SLOTS: usize = 8;
const MAX_SLOTS: usize = 32;

struct Slot {
    data: Box<[u8]>,
    pos: u64,
    dirty: bool,
}

pub struct BufferPool {
    file: File,
    block_size: usize,
    slots: Vec<Slot>,
    capacity: usize,
    resident: LruCache<u64, usize, ahash::RandomState>,
    current_leaf: Option<u64>,
    pinned: Vec<u64>,
    high: u64,
    loads: u64,
}

impl BufferPool {
    /// `high` is the offset of the last block already in the file; new
    /// blocks are allocated after it.
    pub fn new(file: File, block_size: usize, high: u64) -> Self {
        let capacity = (POOL_BYTES / block_size).clamp(MIN_SLOTS, MAX_SLOTS);
        Self {
            file,
            block_size,
            slots: Vec::with_capacity(capacity),
            capacity,
            resident: LruCache::unbounded_with_hasher(ahash::RandomState::new()),
            current_leaf: None,
            pinned: Vec::with_capacity(4),
            high,
            loads: 0,
        }
    }

    pub fn high_water(&self) -> u64 {
        self.high
    }

    /// Number of blocks read back from disk after eviction.
    pub fn reloads(&self) -> u64 {
        self.loads
    }

    /// The leaf being appended to is never evicted.
    pub fn set_current_leaf(&mut self, pos: u64) {
        self.current_leaf = Some(pos);
    }

    pub fn release_pins(&mut self) {
        self.pinned.clear();
    }

    /// Make `pos` the first candidate for eviction.
    pub fn demote(&mut self, pos: u64) {
        self.resident.demote(&pos);
    }

    /// Allocate a fresh `DEL`-filled block at the high-water mark and pin it.
    pub fn allocate(&mut self) -> Result<(usize, u64)> {
        let slot = self.free_slot()?;
        self.high += self.block_size as u64;
        let pos = self.high;
        let entry = &mut self.slots[slot];
        entry.data.fill(DEL);
        entry.pos = pos;
        entry.dirty = true;
        self.resident.put(pos, slot);
        self.pinned.push(pos);
        Ok((slot, pos))
    }

    /// Slot holding the block at `pos`, reading it in when not resident.
    pub fn load(&mut self, pos: u64) -> Result<usize> {
        if let Some(&slot) = self.resident.get(&pos) {
            self.pinned.push(pos);
            return Ok(slot);
        }
        let slot = self.free_slot()?;
        let entry = &mut self.slots[slot];
        self.file
            .seek(SeekFrom::Start(pos))
            .and_then(|_| self.file.read_exact(&mut entry.data))
            .map_err(BuildError::Read)?;
        entry.pos = pos;
        entry.dirty = false;
        self.loads += 1;
        self.resident.put(pos, slot);
        self.pinned.push(pos);
        Ok(slot)
    }

    pub fn block(&self, slot: usize) -> &[u8] {
        &self.slots[slot].data
    }

    /// Mutable view of a block; marks it dirty.
    pub fn block_mut(&mut self, slot: usize) -> &mut [u8] {
        let entry = &mut self.slots[slot];
        entry.dirty = true;
        &mut entry.data
    }

    /// Write every dirty block back.
    pub fn flush(&mut self) -> Result<()> {
        for i in 0..self.slots.len() {
            self.write_back(i)?;
        }
        self.file.flush().map_err(BuildError::Write)
    }

    pub fn into_file(self) -> File {
        self.file
    }

    /// A slot to reuse: a new one while under capacity, else the least
    /// recently used evictable block.
    fn free_slot(&mut self) -> Result<usize> {
        if self.slots.len() < self.capacity {
            self.slots.push(Slot {
                data: vec![DEL; self.block_size].into_boxed_slice(),
                pos: 0,
                dirty: false,
            });
            return Ok(self.slots.len() - 1);
        }
        let victim = self
            .resident
            .iter()
            .rev()
            .map(|(&pos, &slot)| (pos, slot))
            .find(|(pos, _)| Some(*pos) != self.current_leaf && !self.pinned.contains(pos));
        let Some((pos, slot)) = victim else {
            return Err(BuildError::internal("every buffer pool block is in use"));
        };
        self.write_back(slot)?;
        self.resident.pop(&pos);
        Ok(slot)
    }

    fn write_back(&mut self, slot: usize) -> Result<()> {
        let entry = &mut self.slots[slot];
        if !entry.dirty {
            return Ok(());
        }
        self.file
            .seek(SeekFrom::Start(entry.pos))
            .and_then(|_| self.file.write_all(&entry.data))
            .map_err(BuildError::Write)?;
        entry.dirty = false;
        Ok(())
    }
}
