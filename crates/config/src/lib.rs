//! sqlitelog configuration
//!
//! TOML-based configuration with sensible defaults. A file with a single
//! target logs the `combined` format straight into SQLite:
//!
//! ```toml
//! [[targets]]
//! path = "/var/log/access.db"
//! ```
//!
//! # Example Full Config
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [global]
//! busy_timeout = "1s"
//!
//! [thread_pools.io]
//! threads = 4
//!
//! [formats.access]
//! columns = ["$remote_addr", "$time_iso8601", "$request", "$status", "$request_time"]
//!
//! [defaults]
//! format = "access"
//!
//! [[targets]]
//! path = "/var/log/access.db"
//! buffer = "256k"
//! max = 500
//! flush = "5s"
//! async = "io"
//! ```
//!
//! Parsing goes through `FromStr`:
//!
//! ```
//! use sqlitelog_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[[targets]]\npath = \"/tmp/access.db\"").unwrap();
//! assert_eq!(config.effective_targets().len(), 1);
//! ```

mod error;
mod formats;
mod global;
mod logging;
mod pools;
mod size;
mod targets;
mod validation;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use formats::{COMBINED_COLUMNS, COMBINED_FORMAT, ColumnDecl, ColumnEntry, FormatConfig};
pub use global::{GlobalConfig, RecoveryMode};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use pools::{DEFAULT_POOL, ThreadPoolConfig};
pub use size::ByteSize;
pub use targets::{AsyncMode, PATH_OFF, TargetConfig};
pub use validation::{MIN_BUFFER_SIZE, MIN_FLUSH_INTERVAL, is_identifier};

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings shared by every target
    pub global: GlobalConfig,

    /// Diagnostic logging
    pub log: LogConfig,

    /// Named helper thread pools
    pub thread_pools: HashMap<String, ThreadPoolConfig>,

    /// Named formats (`combined` is predefined)
    pub formats: HashMap<String, FormatConfig>,

    /// Keys inherited by every target that does not set them
    pub defaults: TargetConfig,

    /// Log targets
    pub targets: Vec<TargetConfig>,

    /// Directory relative `init` paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid TOML, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut config = Self::from_str(&contents)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Targets with `[defaults]` applied, in declaration order
    ///
    /// Disabled targets are kept so indexes match the file.
    pub fn effective_targets(&self) -> Vec<TargetConfig> {
        self.targets
            .iter()
            .map(|t| t.merged_with(&self.defaults))
            .collect()
    }

    /// Look up a format, including the predefined `combined`
    pub fn format(&self, name: &str) -> Option<FormatConfig> {
        if name == COMBINED_FORMAT {
            return Some(FormatConfig::combined());
        }
        self.formats.get(name).cloned()
    }

    /// Look up a thread pool; `default` exists even when not declared
    pub fn thread_pool(&self, name: &str) -> Option<ThreadPoolConfig> {
        match self.thread_pools.get(name) {
            Some(pool) => Some(pool.clone()),
            None if name == DEFAULT_POOL => Some(ThreadPoolConfig::default()),
            None => None,
        }
    }

    /// Resolve a path from the config file against its directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
