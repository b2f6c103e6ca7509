//! # diskblob-store
//!
//! File-per-blob content-addressed storage on a local filesystem.
//!
//! Every blob lives in exactly one regular file whose path is a pure
//! function of its reference, under two levels of shard directories:
//!
//! ```text
//! <root>/
//! ├── GENERATION.dat
//! └── sha224/
//!     └── ea/
//!         └── 09/
//!             └── sha224-ea09ae9c...4193.dat
//! ```
//!
//! Writes go to a temp file in the target shard directory and are renamed
//! into place, so readers never see a partial blob. A single directory
//! lock keeps shard-directory cleanup from racing receptions, and two
//! gates bound how many temp files and stat calls are in flight.
//!
//! All operations are synchronous and safe to call from many threads.

mod check;
mod enumerate;
mod error;
mod fetch;
mod generation;
mod receive;
mod remove;
mod stat;

pub mod blobref;
pub mod gate;
pub mod lock;
pub mod shard;
pub mod testing;
pub mod vfs;

pub use blobref::{u32_size, BlobRef, HashAlgo, RefError, SizedRef};
pub use check::check_fs;
pub use error::{Result, StoreError};
pub use fetch::BlobReader;
pub use generation::{Generation, GenerationMarker, GENERATION_FILE};
pub use receive::{classify_rename_error, RenameFailure, RenameResolution, RENAME_RULES};
pub use vfs::{FileKind, FileStat, OsFs, ReadableFile, Vfs, WritableFile};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::gate::Gate;
use crate::lock::DirLock;

/// Below this descriptor limit the store refuses to start. Low, because
/// the macOS default of 256 must still work.
pub const MIN_FD_LIMIT: u64 = 100;
/// Limit suggested to users whose limit is below [`MIN_FD_LIMIT`].
pub const RECOMMENDED_FD_LIMIT: u64 = 1024;
/// Default bound on concurrent stat calls.
pub const DEFAULT_STAT_GATE_SIZE: usize = 10;
/// Default share (percent) of the descriptor limit usable for temp files.
pub const DEFAULT_FD_BUDGET_PERCENT: u8 = 80;

/// How the temp-file gate learns the descriptor limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptorLimit {
    /// Ask the host (`RLIMIT_NOFILE`).
    #[default]
    Probe,
    /// Use this limit instead of probing.
    Fixed(u64),
    /// Run without a temp-file gate.
    Unbounded,
}

/// Tunables fixed at construction.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub stat_gate_size: usize,
    pub fd_budget_percent: u8,
    pub min_fd_limit: u64,
    pub recommended_fd_limit: u64,
    pub descriptor_limit: DescriptorLimit,
    /// Exercise write/read/rename under the root when opening.
    pub self_check: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            stat_gate_size: DEFAULT_STAT_GATE_SIZE,
            fd_budget_percent: DEFAULT_FD_BUDGET_PERCENT,
            min_fd_limit: MIN_FD_LIMIT,
            recommended_fd_limit: RECOMMENDED_FD_LIMIT,
            descriptor_limit: DescriptorLimit::Probe,
            self_check: true,
        }
    }
}

/// Blob storage rooted at a local directory.
pub struct DiskStorage {
    root: PathBuf,
    fs: Arc<dyn Vfs>,
    /// Shared by receptions, exclusive while deleting a shard directory.
    dir_lock: DirLock,
    /// Bounds open temp files so concurrent receptions stay under the
    /// descriptor limit. `None` where the limit is unknown.
    tmp_file_gate: Option<Gate>,
    /// Bounds in-flight stat calls.
    stat_gate: Gate,
    generation: Option<GenerationMarker>,
}

impl DiskStorage {
    /// Open the store rooted at `root`, which must already exist.
    ///
    /// Initialises the generation marker if missing and, unless disabled,
    /// runs a short write/read/rename check under the root.
    pub fn open<P: AsRef<Path>>(root: P, options: StoreOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut storage = Self::with_fs(&root, Arc::new(OsFs), options.clone())?;

        let marker = GenerationMarker::new(&root);
        marker.load_or_init()?;
        storage.generation = Some(marker);

        if options.self_check {
            check_fs(&root)?;
        }
        Ok(storage)
    }

    /// Build a store over an arbitrary [`Vfs`].
    ///
    /// Validates the root and sizes the gates; no generation marker and no
    /// self-check.
    pub fn with_fs<P: AsRef<Path>>(
        root: P,
        fs: Arc<dyn Vfs>,
        options: StoreOptions,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        match fs.stat(&root) {
            Ok(stat) if stat.is_dir() => {}
            Ok(_) => return Err(StoreError::RootNotDirectory(root)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::RootMissing(root))
            }
            Err(e) => return Err(e.into()),
        }

        let tmp_file_gate = Self::tmp_file_gate(&options)?;
        Ok(Self {
            root,
            fs,
            dir_lock: DirLock::new(),
            tmp_file_gate,
            stat_gate: Gate::new(options.stat_gate_size),
            generation: None,
        })
    }

    fn tmp_file_gate(options: &StoreOptions) -> Result<Option<Gate>> {
        let limit = match options.descriptor_limit {
            DescriptorLimit::Fixed(n) => Some(n),
            DescriptorLimit::Unbounded => None,
            DescriptorLimit::Probe => gate::descriptor_limit()?,
        };
        let Some(limit) = limit else {
            warn!("descriptor limit unknown, temp files are not gated");
            return Ok(None);
        };
        if limit < options.min_fd_limit {
            return Err(StoreError::DescriptorLimitTooLow {
                limit,
                recommended: options.recommended_fd_limit,
            });
        }
        let capacity = gate::tmp_gate_capacity(limit, options.fd_budget_percent);
        debug!(limit, capacity, "sized temp file gate");
        Ok(Some(Gate::new(capacity)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of `blob` under this root (whether or not it exists).
    pub fn blob_path(&self, blob: &BlobRef) -> PathBuf {
        shard::blob_path(&self.root, blob)
    }

    pub(crate) fn blob_directory(&self, blob: &BlobRef) -> PathBuf {
        shard::blob_directory(&self.root, blob)
    }

    pub fn tmp_file_gate_capacity(&self) -> Option<usize> {
        self.tmp_file_gate.as_ref().map(Gate::capacity)
    }

    pub fn stat_gate_capacity(&self) -> usize {
        self.stat_gate.capacity()
    }
}

impl fmt::Display for DiskStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"filesystem\" file-per-blob at {}", self.root.display())
    }
}

impl fmt::Debug for DiskStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStorage")
            .field("root", &self.root)
            .field("fs", &self.fs)
            .field("tmp_file_gate", &self.tmp_file_gate)
            .field("stat_gate", &self.stat_gate)
            .finish_non_exhaustive()
    }
}

/// Whether `root` already holds a storage tree in this layout.
pub fn is_storage_dir<P: AsRef<Path>>(root: P) -> bool {
    HashAlgo::ALL
        .iter()
        .any(|algo| root.as_ref().join(algo.name()).is_dir())
}
