//! Log targets
//!
//! A target is one database file written with one format. Keys left unset
//! on a target are inherited from `[defaults]`.
//!
//! ```toml
//! [defaults]
//! flush = "5s"
//!
//! [[targets]]
//! path = "/var/log/nginx/access.db"
//! format = "access"
//! buffer = "64k"
//! max = 100
//! if = "$loggable"
//! async = true
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::formats::COMBINED_FORMAT;
use crate::pools::DEFAULT_POOL;
use crate::size::ByteSize;

/// Path value that turns a target off
pub const PATH_OFF: &str = "off";

/// `async` setting
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AsyncMode {
    /// `true` uses the default pool, `false` inserts synchronously
    Switch(bool),
    /// `"on"`, `"off"` or a pool name
    Pool(String),
}

impl AsyncMode {
    /// Pool to offload inserts to, if any
    pub fn pool_name(&self) -> Option<&str> {
        match self {
            Self::Switch(true) => Some(DEFAULT_POOL),
            Self::Switch(false) => None,
            Self::Pool(name) => match name.as_str() {
                "on" => Some(DEFAULT_POOL),
                "off" => None,
                name => Some(name),
            },
        }
    }
}

/// A `[[targets]]` entry, also the shape of `[defaults]`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Database file, or "off"
    pub path: Option<String>,

    /// Format name
    /// Default: combined
    pub format: Option<String>,

    /// Default: true
    pub enabled: Option<bool>,

    /// Shared buffer size; unset means every row is inserted directly
    pub buffer: Option<ByteSize>,

    /// Flush once this many rows are buffered
    pub max: Option<usize>,

    /// Flush buffered rows at least this often
    #[serde(with = "humantime_serde")]
    pub flush: Option<Duration>,

    /// SQL script run once after the table is created
    pub init: Option<PathBuf>,

    /// Only log requests for which this evaluates to a non-empty value other than "0"
    #[serde(rename = "if")]
    pub condition: Option<String>,

    /// Offload inserts to a helper thread pool
    #[serde(rename = "async")]
    pub async_mode: Option<AsyncMode>,
}

impl TargetConfig {
    /// Fill every unset key from `defaults`
    ///
    /// `max` and `flush` are only inherited by targets that end up buffered.
    pub fn merged_with(&self, defaults: &TargetConfig) -> TargetConfig {
        let buffer = self.buffer.or(defaults.buffer);
        let buffered = buffer.is_some();
        TargetConfig {
            path: self.path.clone(),
            format: self.format.clone().or_else(|| defaults.format.clone()),
            enabled: self.enabled.or(defaults.enabled),
            buffer,
            max: self.max.or(defaults.max.filter(|_| buffered)),
            flush: self.flush.or(defaults.flush.filter(|_| buffered)),
            init: self.init.clone().or_else(|| defaults.init.clone()),
            condition: self.condition.clone().or_else(|| defaults.condition.clone()),
            async_mode: self.async_mode.clone().or_else(|| defaults.async_mode.clone()),
        }
    }

    /// Format name, defaulting to `combined`
    pub fn format_name(&self) -> &str {
        self.format.as_deref().unwrap_or(COMBINED_FORMAT)
    }

    /// False for `enabled = false` or `path = "off"`
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true) && self.path.as_deref() != Some(PATH_OFF)
    }

    /// Pool to offload inserts to, if any
    pub fn pool_name(&self) -> Option<&str> {
        self.async_mode.as_ref().and_then(AsyncMode::pool_name)
    }

    /// Identifier used in log lines and errors
    pub fn display_name(&self, index: usize) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => format!("#{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_mode_forms() {
        assert_eq!(AsyncMode::Switch(true).pool_name(), Some(DEFAULT_POOL));
        assert_eq!(AsyncMode::Switch(false).pool_name(), None);
        assert_eq!(AsyncMode::Pool("on".into()).pool_name(), Some(DEFAULT_POOL));
        assert_eq!(AsyncMode::Pool("off".into()).pool_name(), None);
        assert_eq!(AsyncMode::Pool("io".into()).pool_name(), Some("io"));
    }

    #[test]
    fn test_deserialize_target() {
        let target: TargetConfig = toml::from_str(
            r#"
path = "/tmp/a.db"
format = "access"
buffer = "64k"
max = 10
flush = "2s"
if = "$loggable"
async = "io"
"#,
        )
        .unwrap();

        assert_eq!(target.buffer, Some(ByteSize(65536)));
        assert_eq!(target.max, Some(10));
        assert_eq!(target.flush, Some(Duration::from_secs(2)));
        assert_eq!(target.condition.as_deref(), Some("$loggable"));
        assert_eq!(target.pool_name(), Some("io"));
        assert!(target.is_enabled());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<TargetConfig>("path = \"/tmp/a.db\"\nbuffr = 1").is_err());
    }

    #[test]
    fn test_merge_inherits_unset_keys() {
        let defaults = TargetConfig {
            format: Some("access".into()),
            flush: Some(Duration::from_secs(5)),
            max: Some(50),
            ..Default::default()
        };
        let target = TargetConfig {
            path: Some("/tmp/a.db".into()),
            buffer: Some("64k".parse().unwrap()),
            max: Some(7),
            ..Default::default()
        };

        let merged = target.merged_with(&defaults);
        assert_eq!(merged.format_name(), "access");
        assert_eq!(merged.flush, Some(Duration::from_secs(5)));
        assert_eq!(merged.max, Some(7));
        assert_eq!(merged.path.as_deref(), Some("/tmp/a.db"));
    }

    #[test]
    fn test_merge_keeps_limits_off_unbuffered() {
        let defaults = TargetConfig {
            flush: Some(Duration::from_secs(5)),
            max: Some(50),
            ..Default::default()
        };
        let target = TargetConfig {
            path: Some("/tmp/a.db".into()),
            ..Default::default()
        };

        let merged = target.merged_with(&defaults);
        assert_eq!(merged.flush, None);
        assert_eq!(merged.max, None);

        let own = TargetConfig {
            max: Some(3),
            ..target
        };
        assert_eq!(own.merged_with(&defaults).max, Some(3));
    }

    #[test]
    fn test_off_path_disables() {
        let target = TargetConfig {
            path: Some(PATH_OFF.into()),
            ..Default::default()
        };
        assert!(!target.is_enabled());
        assert_eq!(target.format_name(), COMBINED_FORMAT);
    }
}
