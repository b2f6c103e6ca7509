use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::blobref::{BlobRef, RefError};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob not found: {blob}")]
    NotFound { blob: BlobRef },

    #[error("invalid range: negative offset or length (offset {offset}, length {length})")]
    NegativeRange { offset: i64, length: i64 },

    #[error("invalid range: offset {offset} is beyond the end of the blob ({size} bytes)")]
    OffsetOutOfRange { offset: i64, size: u64 },

    #[error("size mismatch for {}: wrote {written} bytes, found {actual} on disk", .path.display())]
    SizeMismatch {
        path: PathBuf,
        written: u64,
        actual: u64,
    },

    #[error(
        "the max number of open file descriptors on your system (ulimit -n) is too low ({limit}). \
         Please fix it with 'ulimit -S -n X' with X being at least {recommended}"
    )]
    DescriptorLimitTooLow { limit: u64, recommended: u64 },

    #[error("error seeking to {offset}: landed at {actual}")]
    ShortSeek { offset: u64, actual: u64 },

    #[error("storage root {} doesn't exist", .0.display())]
    RootMissing(PathBuf),

    #[error("storage root {} exists but is not a directory", .0.display())]
    RootNotDirectory(PathBuf),

    #[error("filesystem check failed: {0}")]
    SelfCheck(String),

    #[error("generation marker {}: {reason}", .path.display())]
    Generation { path: PathBuf, reason: String },

    #[error(transparent)]
    Ref(#[from] RefError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// True for both kinds of rejected range request.
    pub fn is_invalid_range(&self) -> bool {
        matches!(
            self,
            StoreError::NegativeRange { .. } | StoreError::OffsetOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
