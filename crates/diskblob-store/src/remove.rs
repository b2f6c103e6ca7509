//! Blob removal and shard-directory cleanup.

use std::io;
use std::path::Path;

use tracing::{debug, instrument};

use crate::blobref::BlobRef;
use crate::error::Result;
use crate::DiskStorage;

impl DiskStorage {
    /// Remove every blob in `blobs`. Blobs already absent are not an error.
    ///
    /// Stops at the first other failure; blobs before it stay removed.
    #[instrument(skip(self, blobs), fields(count = blobs.len()), level = "debug")]
    pub fn remove_blobs(&self, blobs: &[BlobRef]) -> Result<()> {
        for blob in blobs {
            match self.fs.remove(&self.blob_path(blob)) {
                Ok(()) => debug!(%blob, "removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove `dir` if it is empty, under the exclusive directory lock.
    ///
    /// Every failure is ignored: a non-empty or already-gone directory is
    /// the common case.
    pub fn try_remove_dir(&self, dir: &Path) {
        let _exclusive = self.dir_lock.exclusive();
        if self.fs.remove_dir(dir).is_ok() {
            debug!(dir = %dir.display(), "removed empty shard directory");
        }
    }

    /// Drop the leaf shard directory of each blob, then its parent, where
    /// they are empty.
    pub fn remove_empty_shards(&self, blobs: &[BlobRef]) {
        for blob in blobs {
            let leaf = self.blob_directory(blob);
            self.try_remove_dir(&leaf);
            if let Some(parent) = leaf.parent() {
                self.try_remove_dir(parent);
            }
        }
    }
}
