//! Diagnostic logging configuration
//!
//! Controls sqlitelog's own log output, not the request rows it stores.

use serde::Deserialize;

/// Log level
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Level name as understood by tracing filters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log line encoding
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Console,
    /// One JSON object per line
    Json,
}

/// Where diagnostic lines go
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard error (default, keeps stdout free for command output)
    #[default]
    Stderr,
    Stdout,
    /// Append to a file
    #[serde(untagged)]
    File(String),
}

/// Logging section
///
/// ```toml
/// [log]
/// level = "debug"
/// format = "json"
/// output = "/var/log/sqlitelog.log"
/// filter = "sqlitelog_buffer=trace"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default: info
    pub level: LogLevel,

    /// Default: console
    pub format: LogFormat,

    /// Default: stderr
    pub output: LogOutput,

    /// Extra filter directives appended after the level
    pub filter: Option<String>,
}

impl LogConfig {
    /// Filter directive string for an `EnvFilter`
    ///
    /// `level` replaces the configured level, e.g. from a command line flag.
    pub fn directives(&self, level: Option<&str>) -> String {
        let level = level.unwrap_or(self.level.as_str());
        match self.filter.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("{level},{extra}"),
            _ => level.to_string(),
        }
    }
}
