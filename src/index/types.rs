use crate::error::{BuildError, Result};
use crate::spec::MAX_KEY_SIZE;
use crate::utils::POINTER_SIZE;

/// Tag byte of a leaf block.
pub const LEAF_TAG: u8 = b'V';
/// Tag byte of a branch block.
pub const BRANCH_TAG: u8 = b'U';
/// Tag byte of a deleted-record block.
pub const FREE_TAG: u8 = b'F';

/// Branch levels above the leaves.
pub const MAX_LEVELS: usize = 32;

/// Longest shared prefix a leaf entry can record.
pub const MAX_PREFIX: usize = 255;

/// Entry sizes derived from the key length.
///
/// A leaf entry is the key followed by the 6-byte source position. A branch
/// entry adds the 6-byte pointer of the child to its right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeGeometry {
    pub block_size: usize,
    pub key_size: usize,
    /// Key plus record pointer.
    pub entry_size: usize,
    /// Key plus record pointer plus child pointer.
    pub branch_entry_size: usize,
}

impl TreeGeometry {
    pub fn new(block_size: usize, key_size: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(BuildError::bad_argument("Key length is zero"));
        }
        if key_size > MAX_KEY_SIZE {
            return Err(BuildError::TooLong(format!(
                "Key length {key_size} exceeds {MAX_KEY_SIZE}"
            )));
        }
        let entry_size = key_size + POINTER_SIZE;
        let branch_entry_size = entry_size + POINTER_SIZE;
        // A branch block must hold its leftmost pointer and two entries
        if 1 + POINTER_SIZE + 2 * branch_entry_size > block_size {
            return Err(BuildError::TooLong(format!(
                "Block size {block_size} is too small for key length {key_size}"
            )));
        }
        Ok(Self {
            block_size,
            key_size,
            entry_size,
            branch_entry_size,
        })
    }
}

/// What a finished tree looks like.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSummary {
    /// Root block offset, 0 for an empty tree.
    pub top_block: u64,
    /// Offset of the last allocated block.
    pub high_block: u64,
    /// Levels including the leaves, 0 for an empty tree.
    pub height: usize,
    pub keys: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_geometry_sizes() {
        let g = TreeGeometry::new(512, 12).unwrap();
        assert_eq!(g.entry_size, 18);
        assert_eq!(g.branch_entry_size, 24);
    }

    #[test]
    fn test_geometry_limits() {
        assert_eq!(TreeGeometry::new(512, 256).unwrap_err().kind(), ErrorKind::TooLong);
        // 7 + 2 * (250 + 12) = 531 > 512
        assert_eq!(TreeGeometry::new(512, 250).unwrap_err().kind(), ErrorKind::TooLong);
        assert!(TreeGeometry::new(1024, 255).is_ok());
    }
}
