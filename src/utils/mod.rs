//! Utility functions and data structures.
//!
//! - [`app_data`] - Configuration file in the application data directory
//! - [`collate`] - Collation priority and case-fold tables
//! - [`encoding`] - 6-byte file pointers and fixed-width decimal fields
//! - [`progress`] - Progress bars, or a no-op shim without the `progress` feature

pub mod app_data;
pub mod collate;
pub mod encoding;
pub mod progress;

pub use app_data::*;
pub use collate::*;
pub use encoding::*;
