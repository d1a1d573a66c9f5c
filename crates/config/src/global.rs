//! Settings shared by every target

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// When a failed insert is retried after reopening the database
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Only when SQLite reports that the file was moved or deleted
    #[default]
    FileMoved,
    /// Batch inserts also retry on failures that carry no extended SQLite code
    FileMovedOrUnclassified,
}

/// Global configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Directory holding the shared buffer zone files
    /// Default: /dev/shm on Linux, the system temp dir elsewhere
    pub shm_dir: PathBuf,

    /// SQLite busy timeout for ordinary writes
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// Run a WAL checkpoint before closing each database on worker exit
    /// Default: true
    pub checkpoint_on_exit: bool,

    /// Default: file_moved
    pub recovery: RecoveryMode,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            shm_dir: default_shm_dir(),
            busy_timeout: Duration::from_millis(1000),
            checkpoint_on_exit: true,
            recovery: RecoveryMode::FileMoved,
        }
    }
}

fn default_shm_dir() -> PathBuf {
    let dev_shm = PathBuf::from("/dev/shm");
    if cfg!(target_os = "linux") && dev_shm.is_dir() {
        dev_shm
    } else {
        std::env::temp_dir()
    }
}
