//! Reference-to-path sharding.
//!
//! ```text
//! <root>/
//! └── sha224/
//!     └── ea/
//!         └── 09/
//!             ├── sha224-ea09ae9c...4193.dat        # stored blob
//!             └── sha224-ea09ae9c...4193.Xy12Ab.tmp # in-flight ingestion
//! ```
//!
//! The constants below are the on-disk format. Changing any of them
//! strands every blob already stored and needs a versioned migration.

use std::path::{Path, PathBuf};

use crate::blobref::BlobRef;

/// Hex characters per shard directory level.
pub const SHARD_WIDTH: usize = 2;
/// Number of shard directory levels below the algorithm directory.
pub const SHARD_LEVELS: usize = 2;
/// Extension of stored blob files.
pub const BLOB_EXTENSION: &str = "dat";
/// Suffix of in-flight temp files.
pub const TEMP_SUFFIX: &str = ".tmp";
/// Version of the layout described by the constants above.
pub const LAYOUT_VERSION: u32 = 2;

/// Where a blob lives, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    pub dir: PathBuf,
    pub file_name: String,
}

/// `<algo>-<hex>`, the stem shared by the blob file and its temp files.
pub fn blob_file_base_name(blob: &BlobRef) -> String {
    blob.to_string()
}

pub fn blob_file_name(blob: &BlobRef) -> String {
    format!("{}.{}", blob_file_base_name(blob), BLOB_EXTENSION)
}

/// Shard directory relative to the root: `<algo>/<l1>/<l2>`.
pub fn shard_dir(blob: &BlobRef) -> PathBuf {
    let hex = blob.hex();
    let mut dir = PathBuf::from(blob.algo().name());
    for level in 0..SHARD_LEVELS {
        dir.push(&hex[level * SHARD_WIDTH..(level + 1) * SHARD_WIDTH]);
    }
    dir
}

pub fn shard_location(blob: &BlobRef) -> ShardLocation {
    ShardLocation {
        dir: shard_dir(blob),
        file_name: blob_file_name(blob),
    }
}

pub fn blob_directory(root: &Path, blob: &BlobRef) -> PathBuf {
    root.join(shard_dir(blob))
}

pub fn blob_path(root: &Path, blob: &BlobRef) -> PathBuf {
    let ShardLocation { dir, file_name } = shard_location(blob);
    root.join(dir).join(file_name)
}

/// Prefix handed to the temp-file factory; the factory appends random
/// characters and [`TEMP_SUFFIX`].
pub fn temp_file_prefix(blob: &BlobRef) -> String {
    format!("{}.", blob_file_base_name(blob))
}

/// Inverse of [`blob_file_name`]. Temp files and anything else yield `None`.
pub fn parse_blob_file_name(name: &str) -> Option<BlobRef> {
    let stem = name.strip_suffix(BLOB_EXTENSION)?.strip_suffix('.')?;
    BlobRef::parse(stem).ok()
}

/// Whether `name` could be a shard directory level.
pub fn is_shard_dir_name(name: &str) -> bool {
    name.len() == SHARD_WIDTH
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
