//! Blob retrieval, whole or by byte range.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use tracing::instrument;

use crate::blobref::{u32_size, BlobRef};
use crate::error::{Result, StoreError};
use crate::vfs::{FileStat, ReadableFile};
use crate::DiskStorage;

/// Stream over a stored blob, or a range of it.
///
/// The underlying file handle is closed when the reader is dropped.
pub struct BlobReader {
    inner: io::Take<Box<dyn ReadableFile>>,
}

impl BlobReader {
    fn new(file: Box<dyn ReadableFile>, limit: u64) -> Self {
        Self {
            inner: file.take(limit),
        }
    }

    /// Bytes left before the reader reports end of stream. This is the
    /// requested limit, not the bytes actually left in the file.
    pub fn limit(&self) -> u64 {
        self.inner.limit()
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader")
            .field("limit", &self.inner.limit())
            .finish_non_exhaustive()
    }
}

impl DiskStorage {
    /// Open a stored blob and report its size.
    #[instrument(skip(self), level = "debug")]
    pub fn fetch(&self, blob: &BlobRef) -> Result<(BlobReader, u32)> {
        let stat = self.stat_blob_file(blob)?;
        let file = self.open_blob_file(blob)?;
        Ok((BlobReader::new(file, stat.size), u32_size(stat.size)))
    }

    /// Open `length` bytes of a stored blob starting at `offset`.
    ///
    /// A range running past the end is cut short at the end of the blob.
    /// `offset` equal to the blob size yields an empty stream.
    #[instrument(skip(self), level = "debug")]
    pub fn range_fetch(&self, blob: &BlobRef, offset: i64, length: i64) -> Result<BlobReader> {
        if offset < 0 || length < 0 {
            return Err(StoreError::NegativeRange { offset, length });
        }
        let (start, limit) = (offset as u64, length as u64);

        let stat = self.stat_blob_file(blob)?;
        if start > stat.size {
            return Err(StoreError::OffsetOutOfRange {
                offset,
                size: stat.size,
            });
        }

        let mut file = self.open_blob_file(blob)?;
        if start > 0 {
            let landed = file.seek(SeekFrom::Start(start))?;
            if landed != start {
                return Err(StoreError::ShortSeek {
                    offset: start,
                    actual: landed,
                });
            }
        }
        Ok(BlobReader::new(file, limit))
    }

    fn stat_blob_file(&self, blob: &BlobRef) -> Result<FileStat> {
        self.fs
            .stat(&self.blob_path(blob))
            .map_err(|e| not_found_or_io(e, blob))
    }

    fn open_blob_file(&self, blob: &BlobRef) -> Result<Box<dyn ReadableFile>> {
        // The blob can be removed between stat and open.
        self.fs
            .open(&self.blob_path(blob))
            .map_err(|e| not_found_or_io(e, blob))
    }
}

fn not_found_or_io(err: io::Error, blob: &BlobRef) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound { blob: blob.clone() }
    } else {
        StoreError::Io(err)
    }
}
