//! Helper thread pools for asynchronous inserts

use serde::Deserialize;

/// Pool used by `async = true`
pub const DEFAULT_POOL: &str = "default";

/// One `[thread_pools.<name>]` section
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Helper threads per worker process
    /// Default: 32
    pub threads: usize,

    /// Tasks allowed to wait for a thread before submissions are rejected
    /// Default: 65536
    pub max_queue: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            threads: 32,
            max_queue: 65536,
        }
    }
}
