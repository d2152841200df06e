//! Build errors.
//!
//! Every failure a build can hit maps onto one flat [`ErrorKind`]. The
//! variants of [`BuildError`] keep the underlying I/O error when there is one
//! so callers can still walk `source()`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Longest diagnostic string handed back through [`BuildError::detail`].
pub const MAX_DETAIL_LEN: usize = 240;

pub type Result<T> = std::result::Result<T, BuildError>;

/// Flat error code reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Open,
    Create,
    Close,
    Read,
    Write,
    Delete,
    BadHeader,
    BadFile,
    BadArgument,
    TooLong,
    OutOfMemory,
    UnexpectedEof,
    SortFailure,
    DuplicateKeys,
    InternalInvariantViolation,
    RenameFailure,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Unable to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to close file: {0}")]
    Close(#[source] io::Error),

    #[error("Unable to read from file: {0}")]
    Read(#[source] io::Error),

    /// The source delivered a record the build cannot accept.
    #[error("Invalid record: {0}")]
    Record(String),

    #[error("Unable to write to file: {0}")]
    Write(#[source] io::Error),

    #[error("Unable to delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    BadHeader(String),

    #[error("{0}")]
    BadFile(String),

    #[error("{0}")]
    BadArgument(String),

    #[error("{0}")]
    TooLong(String),

    #[error("Insufficient memory: {0}")]
    OutOfMemory(String),

    #[error("Text file contains EOF character before physical EOF")]
    UnexpectedEof,

    #[error("Sort failed: {0}")]
    Sort(String),

    #[error("{count} duplicate key(s) found")]
    DuplicateKeys { count: u64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unable to rename source reference: {0}")]
    Rename(String),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Open { .. } => ErrorKind::Open,
            BuildError::Create { .. } => ErrorKind::Create,
            BuildError::Close(_) => ErrorKind::Close,
            BuildError::Read(_) | BuildError::Record(_) => ErrorKind::Read,
            BuildError::Write(_) => ErrorKind::Write,
            BuildError::Delete { .. } => ErrorKind::Delete,
            BuildError::BadHeader(_) => ErrorKind::BadHeader,
            BuildError::BadFile(_) => ErrorKind::BadFile,
            BuildError::BadArgument(_) => ErrorKind::BadArgument,
            BuildError::TooLong(_) => ErrorKind::TooLong,
            BuildError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            BuildError::UnexpectedEof => ErrorKind::UnexpectedEof,
            BuildError::Sort(_) => ErrorKind::SortFailure,
            BuildError::DuplicateKeys { .. } => ErrorKind::DuplicateKeys,
            BuildError::Internal(_) => ErrorKind::InternalInvariantViolation,
            BuildError::Rename(_) => ErrorKind::RenameFailure,
        }
    }

    /// Human-readable diagnostic, cut to [`MAX_DETAIL_LEN`] bytes.
    pub fn detail(&self) -> String {
        let mut text = self.to_string();
        if text.len() > MAX_DETAIL_LEN {
            let mut end = MAX_DETAIL_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        text
    }

    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BuildError::Open { path: path.into(), source }
    }

    pub(crate) fn create(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BuildError::Create { path: path.into(), source }
    }

    pub(crate) fn bad_argument(detail: impl Into<String>) -> Self {
        BuildError::BadArgument(detail.into())
    }

    pub(crate) fn invalid_value(arg: &str) -> Self {
        BuildError::BadArgument(format!("Invalid parameter value {arg}"))
    }

    pub(crate) fn invalid_parameter(arg: &str) -> Self {
        BuildError::BadArgument(format!("Invalid parameter {arg}"))
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        BuildError::Internal(detail.into())
    }
}
