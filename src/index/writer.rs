//! Bottom-up B-tree construction from sorted entries.
//!
//! Entries arrive in ascending order and are appended to the rightmost leaf.
//! Leaves are front coded: the first entry is stored whole, every later one
//! as a one-byte shared-prefix length followed by the rest of the key and
//! the 6-byte source position. Branch blocks hold a leftmost child pointer
//! followed by whole `(key, position, child)` entries; a separator lives in
//! its branch, not in a leaf, so in-order traversal yields every entry once.
//!
//! When the rightmost leaf is full the writer first tries to make room by
//! rotating one entry into the left sibling created by the previous split,
//! and only splits when that sibling has already been used. Splits cascade
//! up the right spine, growing a new root when the old one overflows.

use crate::error::{BuildError, Result};
use crate::index::pool::BufferPool;
use crate::index::types::*;
use crate::spec::header::DEL;
use crate::utils::{Collation, POINTER_SIZE, compare_keys, encode_pointer};
use std::cmp::Ordering;
use std::fs::File;
use tracing::trace;

/// Result of offering one entry to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    /// Equal under the collation to the previous key; not stored.
    Duplicate,
}

/// Right-spine state of one branch level.
#[derive(Debug, Clone, Copy)]
struct BranchLevel {
    pos: u64,
    end: usize,
    /// Left neighbour of this level's child, usable for one rotation.
    left: Option<u64>,
    left_end: usize,
    /// Shared prefix of the promoted separator with the left neighbour's
    /// last key, used when the separator moves back down.
    left_repeat: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    TryAppend,
    BorrowLeftSibling,
    GrowRoot,
    SplitAndPromote,
    Done,
}

const SCRATCH: usize = MAX_KEY_BYTES + 2 * POINTER_SIZE;
const MAX_KEY_BYTES: usize = crate::spec::MAX_KEY_SIZE;

pub struct BTreeWriter<'c> {
    pool: BufferPool,
    geometry: TreeGeometry,
    collation: Option<&'c Collation>,
    allow_duplicates: bool,
    branches: Vec<BranchLevel>,
    leaf_pos: u64,
    leaf_end: usize,
    last_key: Vec<u8>,
    /// Separator plus child pointer carried up a split cascade.
    work_key: Vec<u8>,
    top: u64,
    keys: u64,
}

impl<'c> BTreeWriter<'c> {
    pub fn new(
        pool: BufferPool,
        geometry: TreeGeometry,
        collation: Option<&'c Collation>,
        allow_duplicates: bool,
    ) -> Self {
        Self {
            pool,
            geometry,
            collation,
            allow_duplicates,
            branches: Vec::with_capacity(MAX_LEVELS),
            leaf_pos: 0,
            leaf_end: 0,
            last_key: Vec::with_capacity(geometry.key_size),
            work_key: vec![0u8; geometry.branch_entry_size],
            top: 0,
            keys: 0,
        }
    }

    pub fn keys(&self) -> u64 {
        self.keys
    }

    /// Offer the next entry, `key ++ position`, in sorted order.
    pub fn insert(&mut self, entry: &[u8]) -> Result<InsertOutcome> {
        let size = self.geometry.key_size;
        let size1 = self.geometry.entry_size;
        if entry.len() != size1 {
            return Err(BuildError::internal(format!(
                "entry of {} bytes, expected {size1}",
                entry.len()
            )));
        }

        if self.keys == 0 {
            let (slot, pos) = self.pool.allocate()?;
            let block = self.pool.block_mut(slot);
            block[0] = LEAF_TAG;
            block[1..1 + size1].copy_from_slice(entry);
            self.pool.set_current_leaf(pos);
            self.pool.release_pins();
            self.leaf_pos = pos;
            self.leaf_end = size1 + 1;
            self.top = pos;
            self.remember(entry);
            return Ok(InsertOutcome::Added);
        }

        let key = &entry[..size];
        if !self.allow_duplicates
            && compare_keys(self.collation, key, &self.last_key) == Ordering::Equal
        {
            return Ok(InsertOutcome::Duplicate);
        }

        let prefix = shared_prefix(key, &self.last_key);
        if self.leaf_end + size1 - prefix < self.geometry.block_size {
            let slot = self.pool.load(self.leaf_pos)?;
            let end = self.leaf_end;
            let block = self.pool.block_mut(slot);
            block[end] = prefix as u8;
            block[end + 1..end + 1 + size1 - prefix].copy_from_slice(&entry[prefix..]);
            self.leaf_end = end + 1 + size1 - prefix;
            self.pool.release_pins();
        } else {
            self.overflow(entry)?;
        }
        self.remember(entry);
        Ok(InsertOutcome::Added)
    }

    /// Flush every block and report the tree shape.
    pub fn finish(mut self) -> Result<(TreeSummary, File)> {
        self.pool.flush()?;
        let summary = TreeSummary {
            top_block: self.top,
            high_block: self.pool.high_water(),
            height: if self.keys == 0 { 0 } else { self.branches.len() + 1 },
            keys: self.keys,
        };
        Ok((summary, self.pool.into_file()))
    }

    fn remember(&mut self, entry: &[u8]) {
        self.last_key.clear();
        self.last_key.extend_from_slice(&entry[..self.geometry.key_size]);
        self.keys += 1;
    }

    fn load_branch(&mut self, pos: u64) -> Result<usize> {
        let slot = self.pool.load(pos)?;
        if self.pool.block(slot)[0] != BRANCH_TAG {
            return Err(BuildError::internal(format!(
                "block at {pos} is not a branch block"
            )));
        }
        Ok(slot)
    }

    /// Insert `entry` when the current leaf has no room for it.
    fn overflow(&mut self, entry: &[u8]) -> Result<()> {
        let TreeGeometry {
            block_size: bs,
            key_size: size,
            entry_size: size1,
            branch_entry_size: size2,
        } = self.geometry;
        let mut scratch = [0u8; SCRATCH];

        let mut level = self.branches.len();
        let mut is_leaf = true;
        let mut block = self.leaf_pos;
        let mut end = self.leaf_end;
        let mut step = Step::TryAppend;

        loop {
            trace!(?step, level, block, "overflow step");
            step = match step {
                Step::Done => break,

                Step::TryAppend => {
                    self.pool.release_pins();
                    if !is_leaf {
                        end = self.branches[level].end;
                        if end + size2 <= bs {
                            let slot = self.load_branch(block)?;
                            self.pool.block_mut(slot)[end..end + size2]
                                .copy_from_slice(&self.work_key);
                            self.branches[level].end += size2;
                            self.pool.release_pins();
                            Step::Done
                        } else if level == 0 {
                            Step::GrowRoot
                        } else if self.branches[level - 1].left.is_some() {
                            Step::BorrowLeftSibling
                        } else {
                            Step::SplitAndPromote
                        }
                    } else if level == 0 {
                        Step::GrowRoot
                    } else if self.branches[level - 1].left.is_some() {
                        Step::BorrowLeftSibling
                    } else {
                        Step::SplitAndPromote
                    }
                }

                Step::BorrowLeftSibling => {
                    let parent = self.branches[level - 1];
                    let Some(left_pos) = parent.left else {
                        return Err(BuildError::internal("left sibling vanished"));
                    };
                    self.branches[level - 1].left = None;
                    let sep_at = parent.end - size2;

                    let cur = self.pool.load(block)?;
                    let par = self.load_branch(parent.pos)?;
                    let left = self.pool.load(left_pos)?;
                    self.pool.demote(left_pos);

                    if is_leaf {
                        // Parent separator drops to the end of the left leaf
                        let repeat = parent.left_repeat as usize;
                        let separator = &self.pool.block(par)[sep_at..sep_at + size1];
                        scratch[..size1].copy_from_slice(separator);
                        let l = self.pool.block_mut(left);
                        l[parent.left_end] = repeat as u8;
                        l[parent.left_end + 1..parent.left_end + 1 + size1 - repeat]
                            .copy_from_slice(&scratch[repeat..size1]);

                        // The current leaf's first entry becomes the separator
                        scratch[..size1].copy_from_slice(&self.pool.block(cur)[1..1 + size1]);
                        self.pool.block_mut(par)[sep_at..sep_at + size1]
                            .copy_from_slice(&scratch[..size1]);

                        // and the second entry is expanded in its place
                        let c = self.pool.block_mut(cur);
                        let second = c[size1 + 1] as usize;
                        c.copy_within(size1 + 2..end, second + 1);
                        end -= size1 - second + 1;
                        c[end..].fill(DEL);

                        let prefix = shared_prefix(&entry[..size], &self.last_key);
                        if end + size1 - prefix + 1 > bs {
                            Step::SplitAndPromote
                        } else {
                            let c = self.pool.block_mut(cur);
                            c[end] = prefix as u8;
                            c[end + 1..end + 1 + size1 - prefix].copy_from_slice(&entry[prefix..]);
                            self.leaf_end = end + 1 + size1 - prefix;
                            Step::Done
                        }
                    } else {
                        // Separator and our leftmost child move to the left branch
                        let separator = &self.pool.block(par)[sep_at..sep_at + size1];
                        scratch[..size1].copy_from_slice(separator);
                        let leftmost = &self.pool.block(cur)[1..1 + POINTER_SIZE];
                        scratch[size1..size2].copy_from_slice(leftmost);
                        self.pool.block_mut(left)[parent.left_end..parent.left_end + size2]
                            .copy_from_slice(&scratch[..size2]);

                        // Our first separator replaces the parent's
                        scratch[..size1].copy_from_slice(
                            &self.pool.block(cur)[1 + POINTER_SIZE..1 + POINTER_SIZE + size1],
                        );
                        self.pool.block_mut(par)[sep_at..sep_at + size1]
                            .copy_from_slice(&scratch[..size1]);

                        let c = self.pool.block_mut(cur);
                        c.copy_within(size2 + 1..end, 1);
                        c[end - size2..end].copy_from_slice(&self.work_key);
                        Step::Done
                    }
                }

                Step::GrowRoot => {
                    if self.branches.len() >= MAX_LEVELS {
                        return Err(BuildError::internal(format!(
                            "tree height exceeds {MAX_LEVELS} levels"
                        )));
                    }
                    let (root, root_pos) = self.pool.allocate()?;
                    let r = self.pool.block_mut(root);
                    r[0] = BRANCH_TAG;
                    encode_pointer(block, &mut r[1..1 + POINTER_SIZE]);
                    self.top = root_pos;
                    self.branches.insert(
                        0,
                        BranchLevel {
                            pos: root_pos,
                            end: 1 + POINTER_SIZE,
                            left: None,
                            left_end: 0,
                            left_repeat: 0,
                        },
                    );
                    level = 1;
                    Step::SplitAndPromote
                }

                Step::SplitAndPromote => {
                    let old = self.pool.load(block)?;
                    let (new_slot, new_pos) = self.pool.allocate()?;
                    self.branches[level - 1].left = Some(block);
                    let tag = self.pool.block(old)[0];

                    let left_end = if is_leaf {
                        let n = self.pool.block_mut(new_slot);
                        n[0] = tag;
                        n[1..1 + size1].copy_from_slice(entry);

                        // Rebuild the last key of the full leaf; it is promoted
                        let b = self.pool.block(old);
                        let (mut at, mut prefix, mut last_start) = (1usize, 0usize, 1usize);
                        loop {
                            self.work_key[prefix..size].copy_from_slice(&b[at..at + size - prefix]);
                            at += size1 - prefix;
                            if at >= end {
                                self.work_key[size..size1]
                                    .copy_from_slice(&b[at - POINTER_SIZE..at]);
                                break;
                            }
                            last_start = at;
                            prefix = b[at] as usize;
                            at += 1;
                        }
                        self.branches[level - 1].left_repeat = prefix as u8;

                        self.pool.set_current_leaf(new_pos);
                        self.leaf_pos = new_pos;
                        self.leaf_end = size1 + 1;
                        is_leaf = false;
                        last_start
                    } else {
                        let child = &self.pool.block(old)[end - POINTER_SIZE..end];
                        scratch[..POINTER_SIZE].copy_from_slice(child);
                        let n = self.pool.block_mut(new_slot);
                        n[0] = tag;
                        n[1..1 + POINTER_SIZE].copy_from_slice(&scratch[..POINTER_SIZE]);
                        n[1 + POINTER_SIZE..1 + POINTER_SIZE + size2]
                            .copy_from_slice(&self.work_key);
                        self.branches[level].end = 1 + POINTER_SIZE + size2;
                        self.branches[level].pos = new_pos;

                        let left_end = end - size2;
                        self.work_key[..size1]
                            .copy_from_slice(&self.pool.block(old)[left_end..left_end + size1]);
                        left_end
                    };

                    self.branches[level - 1].left_end = left_end;
                    self.pool.block_mut(old)[left_end..].fill(DEL);
                    encode_pointer(new_pos, &mut self.work_key[size1..size2]);
                    level -= 1;
                    block = self.branches[level].pos;
                    Step::TryAppend
                }
            };
        }
        self.pool.release_pins();
        Ok(())
    }
}

/// Bytes shared by `a` and `b` from the start, capped at one byte's range.
#[inline]
pub fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b)
        .take_while(|(x, y)| x == y)
        .count()
        .min(MAX_PREFIX)
}
