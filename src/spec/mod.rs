//! Build specifications.
//!
//! A specification is the ordered field list, the selection predicates and
//! the mode-specific options of one build. It is immutable once a build
//! starts and is persisted into the header block as the argument strings it
//! was parsed from, so [`parser`] can replay it for a reindex.

pub mod header;
pub mod parser;

use crate::error::{BuildError, Result};
use std::path::PathBuf;

pub use parser::{Action, ModeOptions, ParsedCommand, SpecParser, parse_command, parse_stored};

/// Smallest allowed B-tree block.
pub const MIN_BLOCK_SIZE: usize = 512;
/// Largest allowed B-tree block.
pub const MAX_BLOCK_SIZE: usize = 16384;
pub const DEFAULT_BLOCK_SIZE: usize = 1024;
/// Longest record the source reader accepts.
pub const MAX_RECORD_SIZE: usize = 65500;
/// Longest composite key of a B-tree index.
pub const MAX_KEY_SIZE: usize = 255;
pub const MAX_FIELDS: usize = 100;
pub const MAX_PREDICATES: usize = 100;
/// Storage for all predicate values, terminators included.
pub const MAX_PREDICATE_BYTES: usize = 1024;
/// Source name plus stored arguments, separators included.
pub const MAX_ARGUMENT_BYTES: usize = 921;

pub const DEFAULT_SLOT_COUNT: usize = 199;
pub const MIN_SLOT_COUNT: usize = 40;
pub const MAX_SLOT_COUNT: usize = 2000;
pub const DEFAULT_WILDCARD: u8 = b'?';

/// One byte range of a record, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub offset: usize,
    pub length: usize,
    /// Counted in field numbering but not part of the key or the hash.
    pub exclude: bool,
}

impl FieldSpec {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length, exclude: false }
    }

    /// One past the last byte of the field.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::NotEqual => "#",
            Comparison::Greater => "GT",
            Comparison::GreaterOrEqual => "GE",
            Comparison::Less => "LT",
            Comparison::LessOrEqual => "LE",
        }
    }
}

/// A record selection test.
///
/// String predicates compare `value` (already padded or cut to `length`)
/// against the record bytes. Single-byte predicates either test membership
/// in the set of `value` bytes (equality) or compare with its first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectPredicate {
    pub offset: usize,
    pub length: usize,
    pub comparison: Comparison,
    pub value: Vec<u8>,
    pub string_compare: bool,
    /// Starts a new OR group.
    pub or_group_start: bool,
}

/// How the source file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareMode {
    #[default]
    Exclusive,
    Shared,
    SharedReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    Verbose,
    Extra,
}

/// Options of a prefix-compressed B-tree build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    pub block_size: usize,
    /// Sort memory; None takes the configured default.
    pub memory_kb: Option<usize>,
    pub allow_duplicates: bool,
    pub ignore_duplicates: bool,
    pub duplicate_file: Option<PathBuf>,
    pub share: ShareMode,
    /// Read keys and positions from a key-tag file instead of the source.
    pub key_tag_file: Option<PathBuf>,
    pub fixed: bool,
    pub fixed_length: Option<usize>,
    pub text_marker: bool,
    pub work_path: Option<PathBuf>,
    pub invert_selection: bool,
    pub strict_eof: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            memory_kb: None,
            allow_duplicates: false,
            ignore_duplicates: false,
            duplicate_file: None,
            share: ShareMode::Exclusive,
            key_tag_file: None,
            fixed: false,
            fixed_length: None,
            text_marker: false,
            work_path: None,
            invert_selection: false,
            strict_eof: false,
        }
    }
}

/// Options of an AIM signature build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AimOptions {
    /// Bit-plane memory; None takes the configured default.
    pub memory_kb: Option<usize>,
    /// Hash bytes as they are instead of case folding them.
    pub distinct: bool,
    pub fixed: bool,
    pub record_length: Option<usize>,
    pub share: ShareMode,
    pub wildcard: u8,
    pub primary_records: Option<u64>,
    pub add_primary: bool,
    pub reclaim: bool,
    pub text_marker: bool,
    pub invert_selection: bool,
    pub secondary_records: u64,
    pub strict_eof: bool,
    pub slot_count: usize,
}

impl Default for AimOptions {
    fn default() -> Self {
        Self {
            memory_kb: None,
            distinct: false,
            fixed: false,
            record_length: None,
            share: ShareMode::Exclusive,
            wildcard: DEFAULT_WILDCARD,
            primary_records: None,
            add_primary: false,
            reclaim: false,
            text_marker: false,
            invert_selection: false,
            secondary_records: 0,
            strict_eof: false,
            slot_count: DEFAULT_SLOT_COUNT,
        }
    }
}

/// Everything a build needs besides the file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec<O> {
    pub fields: Vec<FieldSpec>,
    pub predicates: Vec<SelectPredicate>,
    pub options: O,
    /// Argument strings recorded in the header. Empty means they are
    /// rendered from the typed fields when the header is written.
    pub arguments: Vec<String>,
}

pub type IndexSpec = BuildSpec<IndexOptions>;
pub type AimSpec = BuildSpec<AimOptions>;

impl<O: ModeOptions> Default for BuildSpec<O> {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            predicates: Vec::new(),
            options: O::default(),
            arguments: Vec::new(),
        }
    }
}

impl<O: ModeOptions> BuildSpec<O> {
    /// Bytes a record must have before every field and predicate can be read.
    pub fn high_water(&self) -> usize {
        self.fields.iter().map(FieldSpec::end).max().unwrap_or(0)
    }

    /// Sum of the lengths of the fields that make up the key.
    pub fn key_length(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| !f.exclude)
            .map(|f| f.length)
            .sum()
    }

    /// Arguments to persist, rendering them when none were recorded.
    pub fn stored_arguments(&self) -> Vec<String> {
        if !self.arguments.is_empty() {
            return self.arguments.clone();
        }
        let mut out = Vec::new();
        for field in &self.fields {
            let mut text = if field.length == 1 {
                format!("{}", field.offset + 1)
            } else {
                format!("{}-{}", field.offset + 1, field.end())
            };
            if field.exclude {
                text.push('X');
            }
            out.push(text);
        }
        for (i, pred) in self.predicates.iter().enumerate() {
            if pred.or_group_start && i > 0 {
                out.push("OR".to_string());
            }
            let range = if pred.length == 1 {
                format!("{}", pred.offset + 1)
            } else {
                format!("{}-{}", pred.offset + 1, pred.offset + pred.length)
            };
            out.push(format!(
                "-P{range}{}{}",
                pred.comparison.symbol(),
                String::from_utf8_lossy(&pred.value)
            ));
        }
        self.options.render(&mut out);
        out
    }

    /// Check the limits that hold for every mode.
    pub(crate) fn validate_common(&self) -> Result<()> {
        if self.fields.len() > MAX_FIELDS {
            return Err(BuildError::TooLong("Too many keys".into()));
        }
        if self.predicates.len() > MAX_PREDICATES {
            return Err(BuildError::TooLong("Too many selection parameters".into()));
        }
        for field in &self.fields {
            if field.length == 0 || field.end() > MAX_RECORD_SIZE {
                return Err(BuildError::bad_argument(format!(
                    "Invalid key field {}-{}",
                    field.offset + 1,
                    field.end()
                )));
            }
        }
        for pred in &self.predicates {
            if pred.length == 0
                || pred.value.is_empty()
                || pred.offset + pred.length > MAX_RECORD_SIZE
            {
                return Err(BuildError::bad_argument(format!(
                    "Invalid selection field at {}",
                    pred.offset + 1
                )));
            }
        }
        Ok(())
    }
}

impl IndexSpec {
    /// Reject option combinations and sizes no build can honour.
    pub fn validate(&self, source_name: &str) -> Result<()> {
        self.validate_common()?;
        let opts = &self.options;
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&opts.block_size)
            || !opts.block_size.is_power_of_two()
        {
            return Err(BuildError::bad_argument(format!(
                "Invalid block size {}",
                opts.block_size
            )));
        }
        if self.fields.is_empty() && opts.key_tag_file.is_none() {
            return Err(BuildError::bad_argument("No key fields specified"));
        }
        if self.fields.iter().any(|f| f.exclude) {
            return Err(BuildError::bad_argument(
                "Excluded fields are only valid for signature indexes",
            ));
        }
        if opts.strict_eof && opts.share != ShareMode::Exclusive {
            return Err(BuildError::bad_argument(
                "-J option is mutually exclusive with the -Y option",
            ));
        }
        if opts.allow_duplicates && opts.ignore_duplicates {
            return Err(BuildError::bad_argument(
                "-D option is mutually exclusive with the -F option",
            ));
        }
        if let Some(len) = opts.fixed_length {
            if len == 0 || len > MAX_RECORD_SIZE {
                return Err(BuildError::bad_argument(format!("Invalid record length {len}")));
            }
        }
        let stored: usize = self.stored_arguments().iter().map(|a| a.len() + 1).sum();
        if source_name.len() + stored > MAX_ARGUMENT_BYTES {
            return Err(BuildError::TooLong("Too many arguments".into()));
        }
        if source_name.len() + stored + header::NAME_OFFSET + 1 > opts.block_size {
            return Err(BuildError::TooLong(
                "Block size is too small to hold the arguments".into(),
            ));
        }
        Ok(())
    }
}

impl AimSpec {
    pub fn validate(&self, source_name: &str) -> Result<()> {
        self.validate_common()?;
        let opts = &self.options;
        if self.fields.is_empty() {
            return Err(BuildError::bad_argument("No key fields specified"));
        }
        if !(MIN_SLOT_COUNT..=MAX_SLOT_COUNT).contains(&opts.slot_count) {
            return Err(BuildError::bad_argument(format!(
                "Invalid slot count {}",
                opts.slot_count
            )));
        }
        if opts.reclaim && !opts.fixed {
            return Err(BuildError::bad_argument("-S option requires the -F option"));
        }
        if !self.predicates.is_empty() && !opts.fixed {
            return Err(BuildError::bad_argument("-P option requires the -F option"));
        }
        if opts.strict_eof && opts.share != ShareMode::Exclusive {
            return Err(BuildError::bad_argument(
                "-J option is mutually exclusive with the -Y option",
            ));
        }
        let stored: usize = self.stored_arguments().iter().map(|a| a.len() + 1).sum();
        if source_name.len() + stored > MAX_ARGUMENT_BYTES {
            return Err(BuildError::TooLong("Too many arguments".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_skips_excluded() {
        let spec = AimSpec {
            fields: vec![
                FieldSpec::new(0, 10),
                FieldSpec { offset: 10, length: 5, exclude: true },
                FieldSpec::new(20, 4),
            ],
            ..Default::default()
        };
        assert_eq!(spec.key_length(), 14);
        assert_eq!(spec.high_water(), 24);
    }

    #[test]
    fn test_rendered_arguments_replay() {
        let spec = IndexSpec {
            fields: vec![FieldSpec::new(0, 8), FieldSpec::new(20, 1)],
            predicates: vec![SelectPredicate {
                offset: 9,
                length: 1,
                comparison: Comparison::Equal,
                value: b"AB".to_vec(),
                string_compare: false,
                or_group_start: false,
            }],
            options: IndexOptions {
                block_size: 512,
                allow_duplicates: true,
                ..Default::default()
            },
            arguments: Vec::new(),
        };
        let args = spec.stored_arguments();
        assert_eq!(args, vec!["1-8", "21", "-P10=AB", "-B=512", "-D"]);

        let replayed: IndexSpec = parse_stored(4, &args).unwrap();
        assert_eq!(replayed.fields, spec.fields);
        assert_eq!(replayed.predicates, spec.predicates);
        assert_eq!(replayed.options, spec.options);
    }

    #[test]
    fn test_validate_rejects_small_block() {
        let spec = IndexSpec {
            fields: vec![FieldSpec::new(0, 4)],
            options: IndexOptions { block_size: 256, ..Default::default() },
            ..Default::default()
        };
        let err = spec.validate("input").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadArgument);
    }

    #[test]
    fn test_validate_mutually_exclusive_options() {
        let mut spec = IndexSpec {
            fields: vec![FieldSpec::new(0, 4)],
            ..Default::default()
        };
        spec.options.allow_duplicates = true;
        spec.options.ignore_duplicates = true;
        assert!(spec.validate("input").is_err());

        spec.options.ignore_duplicates = false;
        spec.options.strict_eof = true;
        spec.options.share = ShareMode::Shared;
        assert!(spec.validate("input").is_err());
    }

    #[test]
    fn test_aim_reclaim_requires_fixed() {
        let mut spec = AimSpec {
            fields: vec![FieldSpec::new(0, 4)],
            ..Default::default()
        };
        spec.options.reclaim = true;
        assert!(spec.validate("input").is_err());
        spec.options.fixed = true;
        assert!(spec.validate("input").is_ok());
    }
}
