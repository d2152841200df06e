//! Reading records and turning them into keys.

mod key;
mod select;
mod source;

pub use key::KeyExtractor;
pub use select::Selector;
pub use source::{MmapRecordReader, Record, RecordSource, first_record_length};
