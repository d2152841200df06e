//! Read-only view of a finished ISI file.
//!
//! The file is memory-mapped and the tree walked recursively from the top
//! block. Used by `flatdex stats` and as the oracle in tests.

use crate::error::{BuildError, Result};
use crate::index::types::*;
use crate::spec::header::{DEL, IndexFormat, IsiHeader, IsiPointers, StoredHeader};
use crate::spec::MAX_BLOCK_SIZE;
use crate::utils::{Collation, POINTER_SIZE, compare_keys, decode_pointer};
use memmap2::Mmap;
use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;

/// One key and the source position stored with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub position: u64,
}

/// Result of walking a tree.
#[derive(Debug, Clone, Default)]
pub struct TreeWalk {
    /// Entries in key order: leaf entries interleaved with branch separators.
    pub entries: Vec<IndexEntry>,
    /// Levels including the leaves.
    pub height: usize,
    pub leaf_blocks: u64,
    pub branch_blocks: u64,
}

pub struct IndexReader {
    map: Mmap,
    stored: StoredHeader,
    header: IsiHeader,
    pointers: IsiPointers,
    geometry: TreeGeometry,
}

impl IndexReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| BuildError::open(path, e))?;
        let map = unsafe { Mmap::map(&file).map_err(|e| BuildError::open(path, e))? };
        let head = map[..map.len().min(MAX_BLOCK_SIZE)].to_vec();
        let stored = StoredHeader::from_bytes(head, IndexFormat::Isi)?;
        let header = IsiHeader::decode(stored.as_bytes())?;
        let pointers = IsiPointers::decode(stored.as_bytes());
        let geometry = TreeGeometry::new(header.block_size, header.key_size)
            .map_err(|e| BuildError::BadHeader(format!("Invalid index: {e}")))?;
        Ok(Self {
            map,
            stored,
            header,
            pointers,
            geometry,
        })
    }

    pub fn header(&self) -> &IsiHeader {
        &self.header
    }

    pub fn pointers(&self) -> &IsiPointers {
        &self.pointers
    }

    pub fn geometry(&self) -> TreeGeometry {
        self.geometry
    }

    pub fn stored_header(&self) -> &StoredHeader {
        &self.stored
    }

    fn data(&self) -> &[u8] {
        &self.map
    }

    pub fn walk(&self) -> Result<TreeWalk> {
        walk_tree(self.data(), self.geometry, self.pointers.top_block)
    }

    /// Every entry in key order.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.walk()?.entries)
    }

    /// Walk the tree and check that keys never decrease under `collation`.
    pub fn verify(&self, collation: Option<&Collation>) -> Result<TreeWalk> {
        let walk = walk_tree(self.data(), self.geometry, self.pointers.top_block)?;
        for (i, pair) in walk.entries.windows(2).enumerate() {
            let order = compare_keys(collation, &pair[0].key, &pair[1].key);
            let duplicate =
                order == Ordering::Equal && !self.header.allow_duplicates && collation.is_none();
            if order == Ordering::Greater || duplicate {
                return Err(BuildError::BadFile(format!(
                    "Keys out of order at entry {}",
                    i + 1
                )));
            }
        }
        Ok(walk)
    }

    /// Positions held in the deleted-record chain, newest block first.
    pub fn deleted_positions(&self) -> Result<Vec<u64>> {
        let data = self.data();
        let bs = self.geometry.block_size;
        let mut out = Vec::new();
        let mut next = self.pointers.delete_chain;
        let mut remaining = data.len() / bs;
        while next != 0 {
            let block = block_at(data, next, bs)?;
            if block[0] != FREE_TAG || remaining == 0 {
                return Err(BuildError::BadFile(format!("Invalid deleted-record block at {next}")));
            }
            remaining -= 1;
            let mut at = 1 + POINTER_SIZE;
            while at + POINTER_SIZE <= bs && block[at..at + POINTER_SIZE] != [DEL; POINTER_SIZE] {
                out.push(decode_pointer(&block[at..at + POINTER_SIZE]));
                at += POINTER_SIZE;
            }
            next = decode_pointer(&block[1..1 + POINTER_SIZE]);
        }
        Ok(out)
    }
}

fn block_at(data: &[u8], pos: u64, block_size: usize) -> Result<&[u8]> {
    let start = pos as usize;
    data.get(start..start + block_size)
        .filter(|_| pos > 0)
        .ok_or_else(|| BuildError::BadFile(format!("Block pointer {pos} is outside the file")))
}

/// The rest of the block is padding.
fn at_block_end(block: &[u8], at: usize) -> bool {
    at >= block.len() || (block[at] == DEL && block[at..].iter().all(|&b| b == DEL))
}

/// Walk the tree rooted at `top` inside `data`, the whole file.
pub fn walk_tree(data: &[u8], geometry: TreeGeometry, top: u64) -> Result<TreeWalk> {
    let mut walk = TreeWalk::default();
    if top == 0 {
        return Ok(walk);
    }
    walk.height = visit(data, geometry, top, 0, &mut walk)?;
    Ok(walk)
}

/// Returns the height of the subtree at `pos`.
fn visit(
    data: &[u8],
    g: TreeGeometry,
    pos: u64,
    depth: usize,
    walk: &mut TreeWalk,
) -> Result<usize> {
    if depth > MAX_LEVELS {
        return Err(BuildError::BadFile("Tree is deeper than the maximum height".into()));
    }
    let block = block_at(data, pos, g.block_size)?;
    let (size, size1, size2) = (g.key_size, g.entry_size, g.branch_entry_size);

    match block[0] {
        LEAF_TAG => {
            walk.leaf_blocks += 1;
            let mut key = block[1..1 + size].to_vec();
            walk.entries.push(IndexEntry {
                key: key.clone(),
                position: decode_pointer(&block[1 + size..1 + size1]),
            });
            let mut at = 1 + size1;
            while !at_block_end(block, at) {
                let prefix = block[at] as usize;
                let end = at + 1 + size1 - prefix;
                if prefix > size || end > block.len() {
                    return Err(BuildError::BadFile(format!("Corrupt leaf entry in block {pos}")));
                }
                key[prefix..].copy_from_slice(&block[at + 1..at + 1 + size - prefix]);
                walk.entries.push(IndexEntry {
                    key: key.clone(),
                    position: decode_pointer(&block[end - POINTER_SIZE..end]),
                });
                at = end;
            }
            Ok(1)
        }
        BRANCH_TAG => {
            walk.branch_blocks += 1;
            let child = decode_pointer(&block[1..1 + POINTER_SIZE]);
            let height = visit(data, g, child, depth + 1, walk)?;
            let mut at = 1 + POINTER_SIZE;
            while !at_block_end(block, at) && at + size2 <= block.len() {
                walk.entries.push(IndexEntry {
                    key: block[at..at + size].to_vec(),
                    position: decode_pointer(&block[at + size..at + size1]),
                });
                let child = decode_pointer(&block[at + size1..at + size2]);
                if visit(data, g, child, depth + 1, walk)? != height {
                    return Err(BuildError::BadFile(format!(
                        "Unbalanced subtrees under block {pos}"
                    )));
                }
                at += size2;
            }
            Ok(height + 1)
        }
        tag => Err(BuildError::BadFile(format!(
            "Unexpected block tag {tag:#04x} at {pos}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::pointer_bytes;

    fn leaf(bs: usize, entries: &[(&[u8], u64)]) -> Vec<u8> {
        let mut b = vec![DEL; bs];
        b[0] = LEAF_TAG;
        let mut at = 1;
        let mut last: &[u8] = &[];
        for (i, (key, pos)) in entries.iter().enumerate() {
            let prefix = if i == 0 {
                0
            } else {
                key.iter().zip(last).take_while(|(a, b)| a == b).count()
            };
            if i > 0 {
                b[at] = prefix as u8;
                at += 1;
            }
            b[at..at + key.len() - prefix].copy_from_slice(&key[prefix..]);
            at += key.len() - prefix;
            b[at..at + 6].copy_from_slice(&pointer_bytes(*pos));
            at += 6;
            last = key;
        }
        b
    }

    #[test]
    fn test_walk_hand_built_tree() {
        let bs = 512;
        let g = TreeGeometry::new(bs, 3).unwrap();
        let mut data = vec![0u8; bs];
        data.extend(leaf(bs, &[(b"aaa", 1), (b"aab", 2)]));
        data.extend(leaf(bs, &[(b"ccc", 4)]));
        let mut root = vec![DEL; bs];
        root[0] = BRANCH_TAG;
        root[1..7].copy_from_slice(&pointer_bytes(512));
        root[7..10].copy_from_slice(b"bbb");
        root[10..16].copy_from_slice(&pointer_bytes(3));
        root[16..22].copy_from_slice(&pointer_bytes(1024));
        data.extend(root);

        let walk = walk_tree(&data, g, 1536).unwrap();
        let keys: Vec<&[u8]> = walk.entries.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"aaa"[..], b"aab", b"bbb", b"ccc"]);
        assert_eq!(walk.height, 2);
        assert_eq!((walk.leaf_blocks, walk.branch_blocks), (2, 1));
    }

    #[test]
    fn test_bad_tag_is_bad_file() {
        let data = vec![b'Q'; 1024];
        let g = TreeGeometry::new(512, 3).unwrap();
        let err = walk_tree(&data, g, 512).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadFile);
    }

    #[test]
    fn test_pointer_outside_file() {
        let g = TreeGeometry::new(512, 3).unwrap();
        assert!(walk_tree(&[0u8; 512], g, 4096).is_err());
    }
}
