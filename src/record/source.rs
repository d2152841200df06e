//! Record sources.
//!
//! A source hands out one record at a time together with the byte offset it
//! started at. Text files are split on `\n`; a trailing `\r` is dropped.

use crate::error::{BuildError, Result};
use crate::spec::MAX_RECORD_SIZE;
use memchr::memchr;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// First byte of a record that has been deleted in place.
const DELETE_BYTES: [u8; 2] = [0x7F, 0xFF];
/// Logical end-of-file marker.
const EOF_MARKER: u8 = 0x1A;

/// One read from a [`RecordSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    Data(&'a [u8]),
    /// A deleted record; [`RecordSource::last_position`] names its offset.
    Deleted,
    Eof,
}

pub trait RecordSource {
    fn next_record(&mut self) -> Result<Record<'_>>;

    /// Offset of the most recent record. After [`Record::Eof`] this is the
    /// offset reading stopped at, so it equals [`Self::eof_position`] unless
    /// a logical end-of-file marker cut the file short.
    fn last_position(&self) -> u64;

    /// Physical size of the source.
    fn eof_position(&self) -> u64;

    fn rewind(&mut self);
}

/// Memory-mapped text record reader.
pub struct MmapRecordReader {
    path: PathBuf,
    map: Option<Mmap>,
    pos: usize,
    last: usize,
    max_len: usize,
    fixed_len: Option<usize>,
}

impl MmapRecordReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| BuildError::open(path, e))?;
        let len = file.metadata().map_err(|e| BuildError::open(path, e))?.len();
        // Mapping a zero-length file is not portable
        let map = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file).map_err(|e| BuildError::open(path, e))? })
        };
        Ok(Self {
            path: path.to_path_buf(),
            map,
            pos: 0,
            last: 0,
            max_len: MAX_RECORD_SIZE,
            fixed_len: None,
        })
    }

    /// Require every live record to be exactly `len` bytes.
    pub fn with_fixed_length(mut self, len: usize) -> Self {
        self.fixed_len = Some(len);
        self.max_len = len;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// Terminator width of the first live record: 2 for `\r\n`, 1 for `\n`.
    /// `None` when there is no live record or it runs to the end of the file.
    pub fn terminator_width(&mut self) -> Result<Option<usize>> {
        let end = loop {
            match self.next_record()? {
                Record::Deleted => continue,
                Record::Data(rec) => {
                    let len = rec.len();
                    break Some(self.last + len);
                }
                Record::Eof => break None,
            }
        };
        self.rewind();
        let data = self.data();
        Ok(end.and_then(|end| match data.get(end..end + 2) {
            Some(b"\r\n") => Some(2),
            _ if data.get(end) == Some(&b'\n') => Some(1),
            _ => None,
        }))
    }
}

impl RecordSource for MmapRecordReader {
    fn next_record(&mut self) -> Result<Record<'_>> {
        let len = self.data().len();
        self.last = self.pos;
        if self.pos >= len {
            return Ok(Record::Eof);
        }

        let start = self.pos;
        let first = self.data()[start];
        if first == EOF_MARKER {
            self.pos = start + 1;
            self.last = self.pos;
            return Ok(Record::Eof);
        }

        if DELETE_BYTES.contains(&first) {
            let data = self.data();
            let mut end = start;
            while end < len && DELETE_BYTES.contains(&data[end]) {
                end += 1;
            }
            if end < len && data[end] == b'\r' {
                end += 1;
            }
            if end < len && data[end] == b'\n' {
                end += 1;
            }
            self.pos = end;
            return Ok(Record::Deleted);
        }

        let (line_end, next) = match memchr(b'\n', &self.data()[start..]) {
            Some(off) => (start + off, start + off + 1),
            None => (len, len),
        };
        let mut end = line_end;
        if end > start && self.data()[end - 1] == b'\r' {
            end -= 1;
        }
        let size = end - start;
        if size > self.max_len {
            return Err(BuildError::Record(format!(
                "record at offset {start} is longer than {} bytes",
                self.max_len
            )));
        }
        if let Some(fixed) = self.fixed_len {
            if size != fixed {
                return Err(BuildError::Record(format!(
                    "record at offset {start} has length {size}, expected {fixed}"
                )));
            }
        }
        self.pos = next;
        Ok(Record::Data(&self.data()[start..end]))
    }

    fn last_position(&self) -> u64 {
        self.last as u64
    }

    fn eof_position(&self) -> u64 {
        self.data().len() as u64
    }

    fn rewind(&mut self) {
        self.pos = 0;
        self.last = 0;
    }
}

/// Length of the first live record, skipping deleted ones. `None` when the
/// source has no live record.
pub fn first_record_length(source: &mut dyn RecordSource) -> Result<Option<usize>> {
    let found = loop {
        match source.next_record()? {
            Record::Deleted => continue,
            Record::Data(rec) => break Some(rec.len()),
            Record::Eof => break None,
        }
    };
    source.rewind();
    Ok(found)
}
