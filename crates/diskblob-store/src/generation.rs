//! Storage generation marker.
//!
//! `<root>/GENERATION.dat` holds a random token written when the store is
//! first initialised (or explicitly reset). Its modification time is the
//! generation's init time. Clients that cache what a store holds compare
//! generations to notice the store was wiped underneath them.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::DiskStorage;

pub const GENERATION_FILE: &str = "GENERATION.dat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub init_time: SystemTime,
    pub random: String,
}

#[derive(Debug, Clone)]
pub struct GenerationMarker {
    root: PathBuf,
    path: PathBuf,
}

impl GenerationMarker {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            path: root.join(GENERATION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker, or `None` if there is none yet.
    pub fn load(&self) -> Result<Option<Generation>> {
        let random = match fs::read_to_string(&self.path) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if random.is_empty() {
            return Err(self.invalid("marker is empty"));
        }
        let init_time = fs::metadata(&self.path)?.modified()?;
        Ok(Some(Generation { init_time, random }))
    }

    pub fn load_or_init(&self) -> Result<Generation> {
        match self.load()? {
            Some(generation) => Ok(generation),
            None => self.reset(),
        }
    }

    /// Replace the marker with a fresh random token.
    pub fn reset(&self) -> Result<Generation> {
        let random = Uuid::new_v4().simple().to_string();

        let mut temp = NamedTempFile::new_in(&self.root)?;
        writeln!(temp, "{random}")?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        info!(path = %self.path.display(), %random, "initialised storage generation");
        self.load()?
            .ok_or_else(|| self.invalid("marker vanished after being written"))
    }

    fn invalid(&self, reason: &str) -> StoreError {
        StoreError::Generation {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl DiskStorage {
    pub fn storage_generation(&self) -> Result<Generation> {
        let marker = self.generation_marker()?;
        marker
            .load()?
            .ok_or_else(|| marker.invalid("marker is missing"))
    }

    pub fn reset_storage_generation(&self) -> Result<Generation> {
        debug!(root = %self.root.display(), "resetting storage generation");
        self.generation_marker()?.reset()
    }

    fn generation_marker(&self) -> Result<&GenerationMarker> {
        self.generation.as_ref().ok_or_else(|| StoreError::Generation {
            path: self.root.join(GENERATION_FILE),
            reason: "store was not opened on the host filesystem".to_string(),
        })
    }
}
