//! Startup filesystem self-check.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, StoreError};

const PROBE: &[u8] = b"foo";

/// Exercise create, write, read back, and rename in a scratch directory
/// under `root`.
///
/// Catches roots that are read-only, full, or backed by a filesystem whose
/// rename doesn't behave, before the first blob is accepted.
pub fn check_fs(root: &Path) -> Result<()> {
    let scratch = tempfile::Builder::new()
        .prefix(".fscheck")
        .tempdir_in(root)
        .map_err(|e| failed("create scratch directory", root, e))?;
    let temp_name = scratch.path().join("FILE.tmp");
    let final_name = scratch.path().join("FILE");

    fs::write(&temp_name, PROBE).map_err(|e| failed("write", &temp_name, e))?;
    let read = fs::read(&temp_name).map_err(|e| failed("read back", &temp_name, e))?;
    if read != PROBE {
        return Err(StoreError::SelfCheck(format!(
            "{} read back {} bytes that differ from what was written",
            temp_name.display(),
            read.len()
        )));
    }

    if final_name.exists() {
        return Err(StoreError::SelfCheck(format!(
            "{} exists but shouldn't",
            final_name.display()
        )));
    }
    fs::rename(&temp_name, &final_name).map_err(|e| failed("rename", &temp_name, e))?;
    if !final_name.is_file() {
        return Err(StoreError::SelfCheck(format!(
            "{} missing after rename",
            final_name.display()
        )));
    }

    scratch
        .close()
        .map_err(|e| failed("remove scratch directory", root, e))?;
    debug!(root = %root.display(), "filesystem check passed");
    Ok(())
}

fn failed(step: &str, path: &Path, err: io::Error) -> StoreError {
    StoreError::SelfCheck(format!("{step} {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_passes_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        check_fs(temp.path()).unwrap();
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_check_fails_on_missing_root() {
        let temp = TempDir::new().unwrap();
        let err = check_fs(&temp.path().join("gone")).unwrap_err();
        assert!(matches!(err, StoreError::SelfCheck(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_fails_on_read_only_root() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path().join("ro");
        fs::create_dir(&root).unwrap();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o500)).unwrap();

        let result = check_fs(&root);
        fs::set_permissions(&root, fs::Permissions::from_mode(0o700)).unwrap();

        // Root ignores permission bits.
        if unsafe { libc::geteuid() } != 0 {
            assert!(matches!(result, Err(StoreError::SelfCheck(_))));
        }
    }
}
