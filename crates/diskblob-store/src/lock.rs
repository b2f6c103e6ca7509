//! Directory lock.
//!
//! Shard directories are created by receptions and deleted by cleanup.
//! Receptions hold the lock shared from "ensure the shard directory exists"
//! until their temp file is created inside it; cleanup holds it exclusively
//! around each `remove_dir`. A non-empty directory can't be removed, so once
//! the temp file exists the reception no longer needs the lock.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct DirLock {
    inner: RwLock<()>,
}

impl DirLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held while a reception depends on its shard directory existing.
    pub fn shared(&self) -> RwLockReadGuard<'_, ()> {
        // The lock guards no data, so a poisoned lock is still usable.
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Held while removing a possibly-empty shard directory.
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
