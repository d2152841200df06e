//! External sort of fixed-size records.
//!
//! Records are collected into an in-memory run sized by the memory budget.
//! A full run is sorted in parallel and spilled to a temporary file; `get`
//! then merges the spilled runs with a binary heap. Inputs that fit in one
//! run never touch the disk.

use crate::error::{BuildError, Result};
use rayon::prelude::*;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// The sort collaborator of the B-tree build.
pub trait RecordSort {
    /// Start a sort of `record_size`-byte records ordered by the raw bytes of
    /// `key_ranges`, compared in turn.
    fn begin(&mut self, record_size: usize, key_ranges: &[Range<usize>]) -> Result<()>;

    fn put(&mut self, record: &[u8]) -> Result<()>;

    /// Next record in ascending order, `None` once drained.
    fn get(&mut self) -> Result<Option<&[u8]>>;

    /// Release spill files.
    fn end(&mut self) -> Result<()>;
}

/// Smallest run regardless of the memory budget.
const MIN_RUN_RECORDS: usize = 256;

pub struct MergeSort {
    memory_bytes: usize,
    work_dir: Option<PathBuf>,
    record_size: usize,
    key_ranges: Vec<Range<usize>>,
    run: Vec<u8>,
    run_capacity: usize,
    spill: Option<TempDir>,
    runs: Vec<PathBuf>,
    state: Drain,
    current: Vec<u8>,
}

enum Drain {
    Filling,
    Memory { next: usize },
    Merge(Merger),
}

impl MergeSort {
    /// `work_dir` may name a directory or a file whose directory is used.
    pub fn new(memory_kb: usize, work_dir: Option<&Path>) -> Self {
        let work_dir = work_dir.map(|p| {
            if p.is_dir() {
                p.to_path_buf()
            } else {
                p.parent().map(Path::to_path_buf).unwrap_or_default()
            }
        });
        Self {
            memory_bytes: memory_kb.saturating_mul(1024),
            work_dir,
            record_size: 0,
            key_ranges: Vec::new(),
            run: Vec::new(),
            run_capacity: 0,
            spill: None,
            runs: Vec::new(),
            state: Drain::Filling,
            current: Vec::new(),
        }
    }

    /// Number of runs written to disk so far.
    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    fn compare(ranges: &[Range<usize>], a: &[u8], b: &[u8]) -> Ordering {
        for r in ranges {
            match a[r.clone()].cmp(&b[r.clone()]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    fn sort_run(&mut self) {
        let size = self.record_size;
        let ranges = &self.key_ranges;
        let mut order: Vec<&[u8]> = self.run.chunks_exact(size).collect();
        order.par_sort_unstable_by(|a, b| Self::compare(ranges, a, b));
        let sorted: Vec<u8> = order.concat();
        self.run = sorted;
    }

    fn spill_run(&mut self) -> Result<()> {
        self.sort_run();
        if self.spill.is_none() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("flatdex-sort");
            let dir = match &self.work_dir {
                Some(dir) if !dir.as_os_str().is_empty() => builder.tempdir_in(dir),
                _ => builder.tempdir(),
            }
            .map_err(|e| BuildError::Sort(format!("unable to create work directory: {e}")))?;
            self.spill = Some(dir);
        }
        let Some(dir) = &self.spill else {
            return Err(BuildError::internal("sort work directory missing"));
        };
        let path = dir.path().join(format!("run{:05}", self.runs.len()));
        let file = File::create(&path)
            .map_err(|e| BuildError::Sort(format!("unable to create {}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&self.run)
            .and_then(|_| writer.flush())
            .map_err(|e| BuildError::Sort(format!("unable to write {}: {e}", path.display())))?;
        debug!(run = self.runs.len(), bytes = self.run.len(), "spilled sort run");
        self.runs.push(path);
        self.run.clear();
        Ok(())
    }
}

impl RecordSort for MergeSort {
    fn begin(&mut self, record_size: usize, key_ranges: &[Range<usize>]) -> Result<()> {
        if record_size == 0 || key_ranges.iter().any(|r| r.end > record_size) {
            return Err(BuildError::Sort("invalid sort key".into()));
        }
        self.record_size = record_size;
        self.key_ranges = key_ranges.to_vec();
        self.run_capacity = (self.memory_bytes / record_size).max(MIN_RUN_RECORDS);
        self.run.clear();
        self.run
            .try_reserve(self.run_capacity.min(1 << 16) * record_size)
            .map_err(|_| BuildError::OutOfMemory("sort buffer".into()))?;
        self.runs.clear();
        self.state = Drain::Filling;
        Ok(())
    }

    fn put(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_size {
            return Err(BuildError::Sort(format!(
                "record of {} bytes, expected {}",
                record.len(),
                self.record_size
            )));
        }
        if self.run.len() / self.record_size >= self.run_capacity {
            self.spill_run()?;
        }
        self.run.extend_from_slice(record);
        Ok(())
    }

    fn get(&mut self) -> Result<Option<&[u8]>> {
        if matches!(self.state, Drain::Filling) {
            if self.runs.is_empty() {
                self.sort_run();
                self.state = Drain::Memory { next: 0 };
            } else {
                if !self.run.is_empty() {
                    self.spill_run()?;
                }
                let merger = Merger::open(&self.runs, self.record_size, &self.key_ranges)?;
                self.state = Drain::Merge(merger);
            }
        }

        let size = self.record_size;
        match &mut self.state {
            Drain::Memory { next } => {
                if *next >= self.run.len() {
                    return Ok(None);
                }
                let start = *next;
                *next += size;
                Ok(Some(&self.run[start..start + size]))
            }
            Drain::Merge(merger) => {
                if merger.pop_into(&mut self.current)? {
                    Ok(Some(&self.current))
                } else {
                    Ok(None)
                }
            }
            Drain::Filling => Ok(None),
        }
    }

    fn end(&mut self) -> Result<()> {
        self.state = Drain::Filling;
        self.run = Vec::new();
        self.runs.clear();
        if let Some(dir) = self.spill.take() {
            let path = dir.path().to_path_buf();
            dir.close().map_err(|source| BuildError::Delete { path, source })?;
        }
        Ok(())
    }
}

struct HeapItem {
    key: Vec<u8>,
    run: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then(self.run.cmp(&other.run))
    }
}

/// K-way merge over sorted run files.
struct Merger {
    readers: Vec<BufReader<File>>,
    pending: Vec<Vec<u8>>,
    heap: BinaryHeap<Reverse<HeapItem>>,
    key_ranges: Vec<Range<usize>>,
}

impl Merger {
    fn open(runs: &[PathBuf], record_size: usize, key_ranges: &[Range<usize>]) -> Result<Self> {
        let mut merger = Self {
            readers: Vec::with_capacity(runs.len()),
            pending: Vec::with_capacity(runs.len()),
            heap: BinaryHeap::with_capacity(runs.len()),
            key_ranges: key_ranges.to_vec(),
        };
        for (i, path) in runs.iter().enumerate() {
            let file = File::open(path).map_err(|e| {
                BuildError::Sort(format!("unable to reopen {}: {e}", path.display()))
            })?;
            merger.readers.push(BufReader::new(file));
            merger.pending.push(vec![0u8; record_size]);
            merger.refill(i)?;
        }
        Ok(merger)
    }

    fn refill(&mut self, run: usize) -> Result<()> {
        let buf = &mut self.pending[run];
        match self.readers[run].read_exact(buf) {
            Ok(()) => {
                let mut key = Vec::new();
                for r in &self.key_ranges {
                    key.extend_from_slice(&buf[r.clone()]);
                }
                self.heap.push(Reverse(HeapItem { key, run }));
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(()),
            Err(e) => Err(BuildError::Sort(format!("unable to read run {run}: {e}"))),
        }
    }

    fn pop_into(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        let Some(Reverse(item)) = self.heap.pop() else {
            return Ok(false);
        };
        out.clear();
        out.extend_from_slice(&self.pending[item.run]);
        self.refill(item.run)?;
        Ok(true)
    }
}
