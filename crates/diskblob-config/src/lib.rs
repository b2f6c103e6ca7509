//! # diskblob-config
//!
//! Configuration management for diskblob.
//!
//! Loads configuration from:
//! 1. `~/.diskblob/config.toml` (global)
//! 2. `.diskblob/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use logging::{init_logging, LogLevel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Project-local config path, relative to the working directory.
pub const PROJECT_CONFIG: &str = ".diskblob/config.toml";

/// Algorithms `storage.hash` may name: the ones new blobs can be hashed with.
pub const HASH_ALGORITHMS: &[&str] = &["sha224", "sha256", "blake3"];

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        Self::load_layers(global.as_deref(), Some(Path::new(PROJECT_CONFIG)), |key| {
            std::env::var(key).ok()
        })
    }

    /// Load a single file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        crate::log_config_debug!("Loading config", path = path.display().to_string());
        let mut config: Config = toml::from_str(&std::fs::read_to_string(path)?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Layered load with an explicit global path, project path and
    /// environment lookup. Missing files are skipped.
    pub fn load_layers(
        global: Option<&Path>,
        project: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config
        if let Some(global_path) = global.filter(|p| p.exists()) {
            crate::log_config_debug!(
                "Loading global config",
                path = global_path.display().to_string()
            );
            config = toml::from_str(&std::fs::read_to_string(global_path)?)?;
        }

        // 2. Project config - overrides global
        if let Some(project_path) = project.filter(|p| p.exists()) {
            crate::log_config_debug!(
                "Loading project config",
                path = project_path.display().to_string()
            );
            let project_config: Config = toml::from_str(&std::fs::read_to_string(project_path)?)?;
            config.merge(project_config);
        }

        // 3. Environment variable overrides
        config.apply_env_overrides(env);

        config.validate()?;
        Ok(config)
    }

    /// Global config path: ~/.diskblob/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".diskblob/config.toml"))
    }

    /// Overlay every field of `other` that differs from the default.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.storage.root != defaults.storage.root {
            self.storage.root = other.storage.root;
        }
        if other.storage.hash != defaults.storage.hash {
            self.storage.hash = other.storage.hash;
        }

        let (ours, theirs, base) = (&mut self.limits, other.limits, defaults.limits);
        if theirs.stat_gate_size != base.stat_gate_size {
            ours.stat_gate_size = theirs.stat_gate_size;
        }
        if theirs.fd_budget_percent != base.fd_budget_percent {
            ours.fd_budget_percent = theirs.fd_budget_percent;
        }
        if theirs.min_fd_limit != base.min_fd_limit {
            ours.min_fd_limit = theirs.min_fd_limit;
        }
        if theirs.recommended_fd_limit != base.recommended_fd_limit {
            ours.recommended_fd_limit = theirs.recommended_fd_limit;
        }
        if theirs.self_check != base.self_check {
            ours.self_check = theirs.self_check;
        }

        if other.logging.level != defaults.logging.level {
            self.logging.level = other.logging.level;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(root) = env("DISKBLOB_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(hash) = env("DISKBLOB_HASH") {
            self.storage.hash = hash;
        }
        if let Some(n) = env("DISKBLOB_STAT_GATE").and_then(|v| v.parse().ok()) {
            self.limits.stat_gate_size = n;
        }
        if let Some(level) = env("DISKBLOB_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !HASH_ALGORITHMS.contains(&self.storage.hash.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "storage.hash must be one of {}, got {:?}",
                HASH_ALGORITHMS.join(", "),
                self.storage.hash
            )));
        }
        if self.limits.stat_gate_size == 0 {
            return Err(ConfigError::Invalid(
                "limits.stat_gate_size must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.limits.fd_budget_percent) {
            return Err(ConfigError::Invalid(format!(
                "limits.fd_budget_percent must be within 1..=100, got {}",
                self.limits.fd_budget_percent
            )));
        }
        Ok(())
    }

    /// Storage root with a leading `~` expanded.
    pub fn root_path(&self) -> PathBuf {
        expand_home(&self.storage.root)
    }

    /// Configured log level, or the default when it doesn't parse.
    ///
    /// `DISKBLOB_LOG` may hold a full filter directive rather than a level;
    /// `init_logging` reads that directly from the environment.
    pub fn log_level(&self) -> LogLevel {
        self.logging.level.parse().unwrap_or_default()
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob store root directory
    pub root: PathBuf,
    /// Hash algorithm used when computing references for new blobs
    pub hash: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.diskblob/blobs"),
            hash: "sha224".to_string(),
        }
    }
}

/// Resource limits applied when opening the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Concurrent stat calls
    pub stat_gate_size: usize,
    /// Share of the open-file limit usable by in-flight temp files
    pub fd_budget_percent: u8,
    /// Refuse to start below this open-file limit
    pub min_fd_limit: u64,
    /// Limit suggested when refusing
    pub recommended_fd_limit: u64,
    /// Write/read/rename probe under the root on open
    pub self_check: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            stat_gate_size: 10,
            fd_budget_percent: 80,
            min_fd_limit: 100,
            recommended_fd_limit: 1024,
            self_check: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default().to_string(),
        }
    }
}
