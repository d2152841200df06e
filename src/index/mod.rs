//! Prefix-compressed B-tree (ISI) indexes.
//!
//! - [`build`] - Build driver: read, select, sort, insert
//! - [`writer`] - Bottom-up B-tree writer with sibling borrowing
//! - [`pool`] - Bounded LRU block cache the writer works through
//! - [`reclaim`] - Chain of deleted record positions
//! - [`reader`] - Read-only tree walker
//! - [`stats`] - `flatdex stats`

pub mod build;
pub mod pool;
pub mod reader;
pub mod reclaim;
pub mod stats;
pub mod types;
pub mod writer;

pub use build::{IndexBuildSummary, build_index};
pub use reader::{IndexEntry, IndexReader};
pub use types::*;
pub use writer::BTreeWriter;
