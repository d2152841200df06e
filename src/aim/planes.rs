//! Bit planes of a signature file, built one window at a time.
//!
//! The file holds one plane per slot, each `record_count / 8` bytes, laid
//! out back to back after the header. Memory holds the same byte window of
//! every plane; once records move past the window it is written out and the
//! next one started.

use crate::error::{BuildError, Result};
use crate::spec::header::AIM_HEADER_SIZE;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

pub struct SignaturePlanes {
    planes: usize,
    plane_size: u64,
    window: usize,
    window_offset: u64,
    /// First record number past the window.
    record_limit: u64,
    buffer: Vec<u8>,
    passes: usize,
    written: usize,
}

impl SignaturePlanes {
    /// Size the window for `record_count` records over `planes` planes
    /// within `memory_bytes`.
    pub fn new(record_count: u64, planes: usize, memory_bytes: usize) -> Result<Self> {
        if memory_bytes < planes {
            return Err(BuildError::OutOfMemory(format!(
                "{memory_bytes} bytes cannot hold {planes} planes"
            )));
        }
        let plane_size = record_count / 8;
        let total = plane_size as usize * planes;
        let budget = memory_bytes.min(total);
        let passes = total.div_ceil(budget);
        let memory = total.div_ceil(passes).next_multiple_of(planes);
        let window = memory / planes;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(memory)
            .map_err(|_| BuildError::OutOfMemory(format!("{memory} bytes for signature planes")))?;
        buffer.resize(memory, 0);

        debug!(planes, plane_size, window, passes, "signature planes sized");
        Ok(Self {
            planes,
            plane_size,
            window,
            window_offset: 0,
            record_limit: window as u64 * 8,
            buffer,
            passes: (plane_size as usize).div_ceil(window),
            written: 0,
        })
    }

    /// Output passes the build will make.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Make `record` addressable, writing out windows it has moved past.
    pub fn advance(&mut self, file: &mut File, record: u64) -> Result<()> {
        while record >= self.record_limit {
            self.write_window(file)?;
        }
        Ok(())
    }

    /// Set the bit of `record` in `plane`. The record must be in the window.
    #[inline]
    pub fn set(&mut self, plane: usize, record: u64) {
        let byte = (record >> 3) - self.window_offset;
        self.buffer[plane * self.window + byte as usize] |= 1 << (record & 7);
    }

    /// Write every window still pending.
    pub fn finish(&mut self, file: &mut File) -> Result<()> {
        while self.window_offset < self.plane_size {
            self.write_window(file)?;
        }
        Ok(())
    }

    fn write_window(&mut self, file: &mut File) -> Result<()> {
        self.written += 1;
        debug!(pass = self.written, offset = self.window_offset, "writing signature window");
        let base = AIM_HEADER_SIZE as u64;
        if self.window as u64 == self.plane_size {
            write_at(file, base, &self.buffer[..self.planes * self.window])?;
            self.window_offset = self.plane_size;
            return Ok(());
        }

        for plane in 0..self.planes {
            let chunk = &self.buffer[plane * self.window..(plane + 1) * self.window];
            write_at(file, base + self.window_offset + plane as u64 * self.plane_size, chunk)?;
        }
        self.window_offset += self.window as u64;
        if self.window_offset + self.window as u64 > self.plane_size {
            self.window = (self.plane_size - self.window_offset) as usize;
        }
        self.record_limit = (self.window_offset + self.window as u64) * 8;
        self.buffer.fill(0);
        Ok(())
    }
}

fn write_at(file: &mut File, pos: u64, data: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(pos))
        .and_then(|_| file.write_all(data))
        .map_err(BuildError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn contents(file: &mut File) -> Vec<u8> {
        let mut data = Vec::new();
        file.rewind().unwrap();
        file.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_budget_below_plane_count() {
        let err = SignaturePlanes::new(1024, 200, 100).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_single_pass_layout() {
        let mut file = tempfile::tempfile().unwrap();
        let mut planes = SignaturePlanes::new(128, 3, 1 << 20).unwrap();
        assert_eq!(planes.passes(), 1);
        planes.advance(&mut file, 9).unwrap();
        planes.set(2, 9);
        planes.finish(&mut file).unwrap();

        let data = contents(&mut file);
        assert_eq!(data.len(), AIM_HEADER_SIZE + 3 * 16);
        assert_eq!(data[AIM_HEADER_SIZE + 2 * 16 + 1], 1 << 1);
    }

    #[test]
    fn test_windowed_matches_single_pass() {
        let records = 1024u64;
        let hits: Vec<(usize, u64)> = (0..records).map(|r| ((r * 7 % 5) as usize, r)).collect();

        let build = |memory: usize| {
            let mut file = tempfile::tempfile().unwrap();
            let mut planes = SignaturePlanes::new(records, 5, memory).unwrap();
            for &(plane, rec) in &hits {
                planes.advance(&mut file, rec).unwrap();
                planes.set(plane, rec);
            }
            planes.finish(&mut file).unwrap();
            (planes.passes(), contents(&mut file))
        };

        let (one, whole) = build(1 << 20);
        // 5 planes of 128 bytes in a 100-byte budget
        let (many, windowed) = build(100);
        assert_eq!(one, 1);
        assert!(many > 1);
        assert_eq!(whole, windowed);
    }
}
