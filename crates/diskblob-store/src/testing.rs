//! In-memory [`Vfs`] for tests.
//!
//! `MemFs` keeps a tree of directories and byte buffers behind one mutex.
//! Faults can be injected to drive the failure paths of the engine that a
//! real filesystem rarely produces on demand.
//!
//! ```ignore
//! use diskblob_store::testing::{Fault, MemFs};
//!
//! let fs = MemFs::with_root("/store");
//! fs.inject(Fault::TruncateOnClose(1));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::shard::TEMP_SUFFIX;
use crate::vfs::{FileKind, FileStat, ReadableFile, Vfs, WritableFile};

/// A failure `MemFs` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every rename fails with this error kind.
    RenameFails(io::ErrorKind),
    /// Temp files lose this many trailing bytes when closed.
    TruncateOnClose(usize),
    /// `mkdir_all` fails with `PermissionDenied`.
    MkdirFails,
    /// `temp_file` fails before creating anything.
    TempFileFails,
    /// A successful rename lands a file this many bytes longer, as if a
    /// differently sized write to the same path finished first.
    GrowOnRename(usize),
}

#[derive(Debug, Default)]
struct State {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
    faults: Vec<Fault>,
    next_temp: u64,
    temp_files_created: u64,
}

impl State {
    fn has_fault(&self, wanted: impl Fn(&Fault) -> bool) -> Option<Fault> {
        self.faults.iter().copied().find(|f| wanted(f))
    }

    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.dirs.contains(parent),
            _ => true,
        }
    }

    fn insert_dirs(&mut self, path: &Path) {
        let mut dir = Some(path);
        while let Some(d) = dir {
            if d.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(d.to_path_buf());
            dir = d.parent();
        }
    }

    fn has_children(&self, dir: &Path) -> bool {
        self.files.keys().any(|p| p.parent() == Some(dir))
            || self.dirs.iter().any(|p| p.parent() == Some(dir))
    }
}

/// In-memory filesystem implementing [`Vfs`].
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    state: Arc<Mutex<State>>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filesystem with `root` (and its ancestors) already created.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let fs = Self::new();
        fs.lock().insert_dirs(root.as_ref());
        fs
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Write a file directly, bypassing the engine.
    pub fn put_file(&self, path: impl AsRef<Path>, data: &[u8]) {
        let path = path.as_ref();
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            state.insert_dirs(parent);
        }
        state.files.insert(path.to_path_buf(), data.to_vec());
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    pub fn dir_exists(&self, path: impl AsRef<Path>) -> bool {
        self.lock().dirs.contains(path.as_ref())
    }

    /// Every file path currently stored, sorted.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    /// Temp files still present.
    pub fn live_temp_files(&self) -> Vec<PathBuf> {
        self.lock()
            .files
            .keys()
            .filter(|p| p.to_string_lossy().ends_with(TEMP_SUFFIX))
            .cloned()
            .collect()
    }

    pub fn temp_files_created(&self) -> u64 {
        self.lock().temp_files_created
    }
}

struct MemTempFile {
    state: Arc<Mutex<State>>,
    path: PathBuf,
}

impl MemTempFile {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for MemTempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let file = state
            .files
            .get_mut(&self.path)
            .ok_or_else(|| not_found(&self.path))?;
        file.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableFile for MemTempFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let mut state = self.lock();
        if let Some(Fault::TruncateOnClose(n)) =
            state.has_fault(|f| matches!(f, Fault::TruncateOnClose(_)))
        {
            if let Some(file) = state.files.get_mut(&self.path) {
                let keep = file.len().saturating_sub(n);
                file.truncate(keep);
            }
        }
        Ok(())
    }
}

impl Vfs for MemFs {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let state = self.lock();
        if let Some(data) = state.files.get(path) {
            return Ok(FileStat {
                size: data.len() as u64,
                kind: FileKind::File,
            });
        }
        if state.dirs.contains(path) {
            return Ok(FileStat {
                size: 0,
                kind: FileKind::Dir,
            });
        }
        Err(not_found(path))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        self.stat(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadableFile>> {
        let data = self
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn temp_file(&self, dir: &Path, prefix: &str) -> io::Result<Box<dyn WritableFile>> {
        let mut state = self.lock();
        if state.has_fault(|f| *f == Fault::TempFileFails).is_some() {
            return Err(io::Error::other("injected temp file failure"));
        }
        if !state.dirs.contains(dir) {
            return Err(not_found(dir));
        }
        state.next_temp += 1;
        state.temp_files_created += 1;
        let path = dir.join(format!("{prefix}{:06}{TEMP_SUFFIX}", state.next_temp));
        state.files.insert(path.clone(), Vec::new());
        Ok(Box::new(MemTempFile {
            state: Arc::clone(&self.state),
            path,
        }))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if let Some(Fault::RenameFails(kind)) =
            state.has_fault(|f| matches!(f, Fault::RenameFails(_)))
        {
            return Err(io::Error::new(kind, "injected rename failure"));
        }
        if !state.parent_exists(to) {
            return Err(not_found(to));
        }
        let mut data = state.files.remove(from).ok_or_else(|| not_found(from))?;
        if let Some(Fault::GrowOnRename(n)) =
            state.has_fault(|f| matches!(f, Fault::GrowOnRename(_)))
        {
            data.resize(data.len() + n, 0);
        }
        state.files.insert(to.to_path_buf(), data);
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        if state.has_children(path) {
            return Err(io::Error::other(format!(
                "{}: directory not empty",
                path.display()
            )));
        }
        state.dirs.remove(path);
        Ok(())
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        if state.has_fault(|f| *f == Fault::MkdirFails).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "injected mkdir failure",
            ));
        }
        if let Some(file) = path.ancestors().find(|d| state.files.contains_key(*d)) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{}: not a directory", file.display()),
            ));
        }
        state.insert_dirs(path);
        Ok(())
    }

    fn read_dir_names(&self, dir: &Path) -> io::Result<Vec<String>> {
        let state = self.lock();
        if !state.dirs.contains(dir) {
            return Err(not_found(dir));
        }
        let names = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();
        Ok(names)
    }
}
