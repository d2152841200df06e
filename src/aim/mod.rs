//! Signature files: superimposed n-gram codes in per-slot bit planes.

pub mod build;
pub mod hash;
pub mod planes;
pub mod reader;

pub use build::{AimBuildSummary, build_signature};
pub use hash::{SignatureHasher, axhash};
pub use reader::AimReader;
