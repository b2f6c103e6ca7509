//! Blob ingestion: temp file, sync, verify, rename, verify.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::blobref::{u32_size, BlobRef, SizedRef};
use crate::error::{Result, StoreError};
use crate::gate::GatePermit;
use crate::shard;
use crate::vfs::{Vfs, WritableFile};
use crate::DiskStorage;

impl DiskStorage {
    /// Store the bytes read from `source` as `blob`.
    ///
    /// Either the blob ends up complete at its final path, or no temp file
    /// is left behind. A size mismatch found after the rename is still an
    /// error, even though the final file then exists. The digest is not
    /// checked against the content.
    #[instrument(skip(self, source), level = "debug")]
    pub fn receive<R: Read + ?Sized>(&self, blob: &BlobRef, source: &mut R) -> Result<SizedRef> {
        let shared = self.dir_lock.shared();

        let dir = self.blob_directory(blob);
        self.fs.mkdir_all(&dir)?;

        // TODO: warn (rate-limited) when receptions queue on a full gate.
        let permit = self.tmp_file_gate.as_ref().map(|gate| gate.start());
        let file = self.fs.temp_file(&dir, &shard::temp_file_prefix(blob))?;
        let mut temp = TempFileGuard::new(&*self.fs, file, permit);

        // The temp file keeps the directory non-empty from here on.
        drop(shared);

        let written = io::copy(source, temp.file_mut()?)?;
        temp.sync_and_close()?;

        let stat = self.fs.lstat(temp.path())?;
        if stat.size != written {
            return Err(StoreError::SizeMismatch {
                path: temp.path().to_path_buf(),
                written,
                actual: stat.size,
            });
        }

        let dest = self.blob_path(blob);
        if let Err(err) = self.fs.rename(temp.path(), &dest) {
            map_rename_error(&*self.fs, err, temp.path(), &dest)?;
        }

        let stat = self.fs.lstat(&dest)?;
        if stat.size != written {
            return Err(StoreError::SizeMismatch {
                path: dest,
                written,
                actual: stat.size,
            });
        }

        temp.disarm();
        Ok(SizedRef {
            blob: blob.clone(),
            size: u32_size(stat.size),
        })
    }
}

/// Owns an in-flight temp file and its gate permit.
///
/// Unless disarmed, dropping the guard closes the handle and removes the
/// file. The permit is released last.
struct TempFileGuard<'a> {
    fs: &'a dyn Vfs,
    file: Option<Box<dyn WritableFile>>,
    path: PathBuf,
    armed: bool,
    _permit: Option<GatePermit<'a>>,
}

impl<'a> TempFileGuard<'a> {
    fn new(fs: &'a dyn Vfs, file: Box<dyn WritableFile>, permit: Option<GatePermit<'a>>) -> Self {
        let path = file.path().to_path_buf();
        Self {
            fs,
            file: Some(file),
            path,
            armed: true,
            _permit: permit,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> io::Result<&mut Box<dyn WritableFile>> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("temp file already closed"))
    }

    fn sync_and_close(&mut self) -> io::Result<()> {
        self.file_mut()?.sync()?;
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard<'_> {
    fn drop(&mut self) {
        drop(self.file.take());
        if !self.armed {
            return;
        }
        debug!(path = %self.path.display(), "removing temp file");
        match self.fs.remove(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temp file"),
        }
    }
}

/// Why a rename failed, as far as the resolution table cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameFailure {
    AlreadyExists,
    /// Windows reports an open or just-written destination this way.
    PermissionDenied,
    CrossDevice,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameResolution {
    /// Succeed if the destination already holds a regular file of the
    /// same size as the temp file (a concurrent reception of the same
    /// blob won the race).
    AcceptExisting,
    /// Return the rename error unchanged.
    Surface,
}

/// Resolution per failure class. Classes not listed are surfaced.
pub const RENAME_RULES: &[(RenameFailure, RenameResolution)] = &[
    (RenameFailure::AlreadyExists, RenameResolution::AcceptExisting),
    (RenameFailure::PermissionDenied, RenameResolution::AcceptExisting),
    (RenameFailure::CrossDevice, RenameResolution::Surface),
];

pub fn classify_rename_error(err: &io::Error) -> RenameFailure {
    if is_cross_device(err) {
        return RenameFailure::CrossDevice;
    }
    match err.kind() {
        io::ErrorKind::AlreadyExists => RenameFailure::AlreadyExists,
        io::ErrorKind::PermissionDenied => RenameFailure::PermissionDenied,
        _ => RenameFailure::Other,
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

fn resolution_for(failure: RenameFailure) -> RenameResolution {
    RENAME_RULES
        .iter()
        .find(|(f, _)| *f == failure)
        .map_or(RenameResolution::Surface, |(_, r)| *r)
}

/// Resolve a failed rename of `from` onto `to` per [`RENAME_RULES`]: either
/// success or the rename error unchanged.
fn map_rename_error(fs: &dyn Vfs, err: io::Error, from: &Path, to: &Path) -> io::Result<()> {
    let failure = classify_rename_error(&err);
    match resolution_for(failure) {
        RenameResolution::Surface => Err(err),
        RenameResolution::AcceptExisting => match (fs.lstat(from), fs.lstat(to)) {
            (Ok(src), Ok(dst)) if dst.is_file() && dst.size == src.size => {
                debug!(?failure, dest = %to.display(), "destination already present, keeping it");
                if let Err(e) = fs.remove(from) {
                    warn!(path = %from.display(), error = %e, "failed to remove temp file");
                }
                Ok(())
            }
            _ => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobref::HashAlgo;
    use crate::testing::{Fault, MemFs};
    use crate::{DescriptorLimit, StoreOptions};
    use std::sync::Arc;

    fn mem_storage() -> (Arc<MemFs>, DiskStorage) {
        let fs = Arc::new(MemFs::with_root("/store"));
        let storage = DiskStorage::with_fs(
            "/store",
            fs.clone(),
            StoreOptions {
                descriptor_limit: DescriptorLimit::Fixed(1024),
                ..StoreOptions::default()
            },
        )
        .unwrap();
        (fs, storage)
    }

    fn blob(data: &[u8]) -> BlobRef {
        BlobRef::compute(HashAlgo::Sha224, data).unwrap()
    }

    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "source died"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(b'x');
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_receive_writes_final_file() {
        let (fs, storage) = mem_storage();
        let b = blob(b"hello");
        let sized = storage.receive(&b, &mut &b"hello"[..]).unwrap();

        assert_eq!(sized.size, 5);
        assert_eq!(fs.read_file(storage.blob_path(&b)).unwrap(), b"hello");
        assert!(fs.live_temp_files().is_empty());
        assert_eq!(fs.temp_files_created(), 1);
    }

    #[test]
    fn test_failing_source_leaves_nothing() {
        let (fs, storage) = mem_storage();
        let b = blob(b"never");
        let err = storage
            .receive(&b, &mut FailingReader { remaining: 100 })
            .unwrap_err();

        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
        assert!(fs.read_file(storage.blob_path(&b)).is_none());
        assert!(fs.live_temp_files().is_empty());
    }

    #[test]
    fn test_truncated_flush_is_size_mismatch() {
        let (fs, storage) = mem_storage();
        fs.inject(Fault::TruncateOnClose(2));
        let b = blob(b"hello");
        let err = storage.receive(&b, &mut &b"hello"[..]).unwrap_err();

        match err {
            StoreError::SizeMismatch {
                written, actual, ..
            } => {
                assert_eq!(written, 5);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fs.read_file(storage.blob_path(&b)).is_none());
        assert!(fs.live_temp_files().is_empty());
    }

    #[test]
    fn test_resized_final_file_is_size_mismatch() {
        let (fs, storage) = mem_storage();
        fs.inject(Fault::GrowOnRename(3));
        let b = blob(b"hello");
        let err = storage.receive(&b, &mut &b"hello"[..]).unwrap_err();

        match err {
            StoreError::SizeMismatch {
                path,
                written,
                actual,
            } => {
                assert_eq!(path, storage.blob_path(&b));
                assert_eq!(written, 5);
                assert_eq!(actual, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fs.live_temp_files().is_empty());
        assert_eq!(storage.tmp_file_gate.as_ref().unwrap().in_flight(), 0);
    }

    #[test]
    fn test_unclassified_rename_failure_surfaces() {
        let (fs, storage) = mem_storage();
        fs.inject(Fault::RenameFails(io::ErrorKind::Other));
        let b = blob(b"hello");
        let err = storage.receive(&b, &mut &b"hello"[..]).unwrap_err();

        assert!(matches!(err, StoreError::Io(_)));
        assert!(fs.read_file(storage.blob_path(&b)).is_none());
        assert!(fs.live_temp_files().is_empty());
    }

    #[test]
    fn test_already_exists_with_same_size_is_accepted() {
        let (fs, storage) = mem_storage();
        let b = blob(b"hello");
        fs.put_file(storage.blob_path(&b), b"hello");
        fs.inject(Fault::RenameFails(io::ErrorKind::AlreadyExists));

        let sized = storage.receive(&b, &mut &b"hello"[..]).unwrap();
        assert_eq!(sized.size, 5);
        assert!(fs.live_temp_files().is_empty());
    }

    #[test]
    fn test_already_exists_with_other_size_surfaces() {
        let (fs, storage) = mem_storage();
        let b = blob(b"hello");
        fs.put_file(storage.blob_path(&b), b"hello world");
        fs.inject(Fault::RenameFails(io::ErrorKind::AlreadyExists));

        let err = storage.receive(&b, &mut &b"hello"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));
        assert_eq!(fs.read_file(storage.blob_path(&b)).unwrap(), b"hello world");
        assert!(fs.live_temp_files().is_empty());
    }

    #[test]
    fn test_mkdir_failure_creates_no_temp_file() {
        let (fs, storage) = mem_storage();
        fs.inject(Fault::MkdirFails);
        let err = storage.receive(&blob(b"a"), &mut &b"a"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
        assert_eq!(fs.temp_files_created(), 0);
    }

    #[test]
    fn test_gate_released_on_every_path() {
        let (fs, storage) = mem_storage();
        storage.receive(&blob(b"ok"), &mut &b"ok"[..]).unwrap();
        let _ = storage.receive(&blob(b"bad"), &mut FailingReader { remaining: 1 });
        fs.inject(Fault::TempFileFails);
        let _ = storage.receive(&blob(b"bad2"), &mut &b"bad2"[..]);

        let gate = storage.tmp_file_gate.as_ref().unwrap();
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_rename_rules_table() {
        assert_eq!(
            resolution_for(RenameFailure::AlreadyExists),
            RenameResolution::AcceptExisting
        );
        assert_eq!(
            resolution_for(RenameFailure::CrossDevice),
            RenameResolution::Surface
        );
        assert_eq!(resolution_for(RenameFailure::Other), RenameResolution::Surface);
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_cross_device() {
        let err = io::Error::from_raw_os_error(libc::EXDEV);
        assert_eq!(classify_rename_error(&err), RenameFailure::CrossDevice);
        let err = io::Error::from_raw_os_error(libc::EEXIST);
        assert_eq!(classify_rename_error(&err), RenameFailure::AlreadyExists);
    }
}
