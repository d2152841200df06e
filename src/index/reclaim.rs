//! Chain of deleted source positions kept with fixed-length builds.
//!
//! Each `F` block holds its tag, a pointer to the previous `F` block and
//! then 6-byte source positions up to the end of the block. The header names
//! the newest block, so the chain is read newest first.

use crate::error::{BuildError, Result};
use crate::index::types::FREE_TAG;
use crate::spec::header::DEL;
use crate::utils::{POINTER_SIZE, encode_pointer};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

pub struct FreeList {
    block: Vec<u8>,
    fill: usize,
    head: u64,
    high: u64,
    count: u64,
}

impl FreeList {
    /// `high` is the offset of the last block already in the file.
    pub fn new(block_size: usize, high: u64) -> Self {
        Self {
            block: vec![DEL; block_size],
            fill: 0,
            head: 0,
            high,
            count: 0,
        }
    }

    /// Newest `F` block, 0 when nothing was recorded.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Offset of the last block the chain allocated.
    pub fn high_water(&self) -> u64 {
        self.high
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn push(&mut self, file: &mut File, position: u64) -> Result<()> {
        if self.head == 0 || self.fill + POINTER_SIZE > self.block.len() {
            if self.head != 0 {
                self.write_block(file)?;
            }
            let previous = self.head;
            self.high += self.block.len() as u64;
            self.head = self.high;
            self.block.fill(DEL);
            self.block[0] = FREE_TAG;
            encode_pointer(previous, &mut self.block[1..1 + POINTER_SIZE]);
            self.fill = 1 + POINTER_SIZE;
        }
        encode_pointer(position, &mut self.block[self.fill..self.fill + POINTER_SIZE]);
        self.fill += POINTER_SIZE;
        self.count += 1;
        Ok(())
    }

    /// Write the block still being filled.
    pub fn finish(&mut self, file: &mut File) -> Result<()> {
        if self.head != 0 {
            self.write_block(file)?;
        }
        Ok(())
    }

    fn write_block(&self, file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(self.head))
            .and_then(|_| file.write_all(&self.block))
            .map_err(BuildError::Write)
    }
}
