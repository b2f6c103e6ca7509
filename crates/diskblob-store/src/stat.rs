//! Batched existence and size lookups.

use std::io;

use rayon::prelude::*;
use tracing::instrument;

use crate::blobref::{u32_size, BlobRef, SizedRef};
use crate::error::Result;
use crate::DiskStorage;

impl DiskStorage {
    /// Sizes of the blobs in `blobs` that are stored, in input order.
    ///
    /// Missing blobs are left out of the result. Lookups run in parallel,
    /// at most `stat_gate_size` at a time.
    #[instrument(skip(self, blobs), fields(count = blobs.len()), level = "debug")]
    pub fn stat_blobs(&self, blobs: &[BlobRef]) -> Result<Vec<SizedRef>> {
        let found = blobs
            .par_iter()
            .map(|blob| self.stat_one(blob))
            .collect::<Result<Vec<_>>>()?;
        Ok(found.into_iter().flatten().collect())
    }

    pub fn exists(&self, blob: &BlobRef) -> Result<bool> {
        Ok(self.stat_one(blob)?.is_some())
    }

    fn stat_one(&self, blob: &BlobRef) -> Result<Option<SizedRef>> {
        let _permit = self.stat_gate.start();
        match self.fs.stat(&self.blob_path(blob)) {
            Ok(stat) => Ok(Some(SizedRef {
                blob: blob.clone(),
                size: u32_size(stat.size),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
