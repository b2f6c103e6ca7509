//! Ordered listing of stored blobs.

use std::io;
use std::path::Path;

use tracing::instrument;

use crate::blobref::{u32_size, BlobRef, HashAlgo, SizedRef};
use crate::error::Result;
use crate::shard::{self, SHARD_LEVELS, SHARD_WIDTH};
use crate::DiskStorage;

struct Walk<'a> {
    after: Option<&'a BlobRef>,
    limit: usize,
    out: Vec<SizedRef>,
}

impl Walk<'_> {
    fn full(&self) -> bool {
        self.out.len() >= self.limit
    }
}

impl DiskStorage {
    /// Up to `limit` stored blobs sorting strictly after `after`, in
    /// reference order.
    ///
    /// Empty shard directories met on the way are removed.
    #[instrument(skip(self), level = "debug")]
    pub fn enumerate(&self, after: Option<&BlobRef>, limit: usize) -> Result<Vec<SizedRef>> {
        let mut walk = Walk {
            after,
            limit,
            out: Vec::new(),
        };
        if limit == 0 {
            return Ok(walk.out);
        }

        let mut algos: Vec<HashAlgo> = self
            .read_names(&self.root)?
            .iter()
            .filter_map(|name| HashAlgo::from_name(name))
            .collect();
        algos.sort_by_key(|algo| algo.name());

        for algo in algos {
            let bound = match after {
                Some(a) if a.algo().name() > algo.name() => continue,
                Some(a) if a.algo() == algo => Some(a.hex()),
                _ => None,
            };
            self.walk_shards(&self.root.join(algo.name()), 0, bound.as_deref(), &mut walk)?;
            if walk.full() {
                break;
            }
        }
        Ok(walk.out)
    }

    /// `bound` is the hex digest of `after` while the walk is still inside
    /// the subtree that contains it.
    fn walk_shards(&self, dir: &Path, level: usize, bound: Option<&str>, walk: &mut Walk<'_>) -> Result<()> {
        let names = self.read_names(dir)?;
        if names.is_empty() && level > 0 {
            self.try_remove_dir(dir);
            return Ok(());
        }
        if level == SHARD_LEVELS {
            return self.list_shard(dir, &names, walk);
        }

        let part = bound.map(|hex| &hex[level * SHARD_WIDTH..(level + 1) * SHARD_WIDTH]);
        let mut subdirs: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| shard::is_shard_dir_name(name))
            .filter(|name| part.map_or(true, |p| *name >= p))
            .collect();
        subdirs.sort_unstable();

        for name in subdirs {
            let child_bound = bound.filter(|_| part == Some(name));
            self.walk_shards(&dir.join(name), level + 1, child_bound, walk)?;
            if walk.full() {
                break;
            }
        }
        Ok(())
    }

    fn list_shard(&self, dir: &Path, names: &[String], walk: &mut Walk<'_>) -> Result<()> {
        let mut blobs: Vec<BlobRef> = names
            .iter()
            .filter_map(|name| shard::parse_blob_file_name(name))
            .filter(|blob| walk.after.map_or(true, |after| blob > after))
            .filter(|blob| self.blob_directory(blob) == dir)
            .collect();
        blobs.sort();

        for blob in blobs {
            if walk.full() {
                break;
            }
            match self.fs.stat(&dir.join(shard::blob_file_name(&blob))) {
                Ok(stat) if stat.is_file() => walk.out.push(SizedRef {
                    size: u32_size(stat.size),
                    blob,
                }),
                Ok(_) => {}
                // Removed since the directory was read.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_names(&self, dir: &Path) -> Result<Vec<String>> {
        match self.fs.read_dir_names(dir) {
            Ok(names) => Ok(names),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
