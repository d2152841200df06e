//! # flatdex - batch index builder for flat record files
//!
//! flatdex reads a file of delimited or fixed-length records and builds one
//! of two secondary index files over it:
//!
//! - an **ISI** file, a prefix-compressed B-tree of the key fields, with a
//!   pointer back to each record's byte offset
//! - an **AIM** file, a signature file of n-gram hash bit-planes, one bit per
//!   record per plane, for fast candidate filtering on substring matches
//!
//! Both formats start with a header block that records the source name and
//! the arguments of the build, so an index can later be rebuilt from its own
//! header ("reindex") or pointed at a moved source ("rename").
//!
//! ## Architecture
//!
//! - [`request`] - Build requests, the shared context and [`execute`]
//! - [`spec`] - Build specifications, the argument parser and header codec
//! - [`record`] - Record source, selection predicates and key extraction
//! - [`sort`] - External merge sort feeding the B-tree writer
//! - [`index`] - ISI buffer pool, B-tree writer, reader and statistics
//! - [`aim`] - n-gram hashing and paged bit-plane output
//! - [`output`] - Colored terminal summaries
//! - [`utils`] - Pointer encoding, collation, configuration, progress
//!
//! ## Quick Start
//!
//! ```ignore
//! use flatdex::request::{BuildContext, BuildMode, BuildRequest, execute};
//! use flatdex::spec::{FieldSpec, IndexSpec};
//!
//! let spec = IndexSpec {
//!     fields: vec![FieldSpec::new(0, 8)],
//!     ..Default::default()
//! };
//! let request = BuildRequest::new(BuildMode::BuildIndex(spec), "people.txt", "people.isi");
//! let summary = execute(&request, &BuildContext::default()).unwrap();
//! ```

pub mod aim;
pub mod error;
pub mod index;
pub mod output;
pub mod record;
pub mod request;
pub mod sort;
pub mod spec;
pub mod utils;

pub use error::{BuildError, ErrorKind, Result};
pub use request::{BuildContext, BuildMode, BuildRequest, BuildSummary, execute};
