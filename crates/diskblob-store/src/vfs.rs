//! Filesystem abstraction.
//!
//! The engine reaches the filesystem only through [`Vfs`], so tests can
//! substitute [`crate::testing::MemFs`] (or a fault-injecting wrapper) for
//! the host filesystem.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::shard::TEMP_SUFFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Other,
}

/// The subset of file metadata the engine looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub kind: FileKind,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

impl From<fs::Metadata> for FileStat {
    fn from(meta: fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_file() {
            FileKind::File
        } else if file_type.is_dir() {
            FileKind::Dir
        } else {
            FileKind::Other
        };
        Self {
            size: meta.len(),
            kind,
        }
    }
}

/// Handle returned by [`Vfs::open`].
pub trait ReadableFile: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadableFile for T {}

/// Handle returned by [`Vfs::temp_file`].
pub trait WritableFile: Write + Send {
    /// Path the file was created at.
    fn path(&self) -> &Path;

    /// Flush file contents to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Close the handle, reporting errors that a plain drop would swallow.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Filesystem capabilities used by the storage engine.
pub trait Vfs: Send + Sync + fmt::Debug {
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Like [`Vfs::stat`] but does not follow a final symlink.
    fn lstat(&self, path: &Path) -> io::Result<FileStat>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadableFile>>;

    /// Create a new, uniquely named file in `dir` whose name starts with
    /// `prefix` and ends with [`TEMP_SUFFIX`].
    fn temp_file(&self, dir: &Path, prefix: &str) -> io::Result<Box<dyn WritableFile>>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    fn read_dir_names(&self, dir: &Path) -> io::Result<Vec<String>>;
}

/// [`Vfs`] over the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

struct OsTempFile {
    file: File,
    path: PathBuf,
}

impl Write for OsTempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl WritableFile for OsTempFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let mut file = self.file;
        file.flush()?;
        drop(file);
        Ok(())
    }
}

impl Vfs for OsFs {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        fs::metadata(path).map(FileStat::from)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        fs::symlink_metadata(path).map(FileStat::from)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadableFile>> {
        Ok(Box::new(File::open(path)?))
    }

    fn temp_file(&self, dir: &Path, prefix: &str) -> io::Result<Box<dyn WritableFile>> {
        // Keep the file on drop: removal is driven by the ingestion guard.
        let (file, path) = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?;
        Ok(Box::new(OsTempFile { file, path }))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(path)
    }

    fn read_dir_names(&self, dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            // Non-UTF-8 names can't belong to the layout.
            if let Ok(name) = entry?.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }
}
