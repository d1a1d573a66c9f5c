//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Required field missing
    #[error("{component} '{name}' is missing required field '{field}'")]
    MissingField {
        /// Component type (e.g., "target", "format")
        component: &'static str,
        /// Name of the component
        name: String,
        /// Missing field name
        field: &'static str,
    },

    /// Field present but its value is unusable
    #[error("{component} '{name}' has invalid {field}: {message}")]
    InvalidValue {
        /// Component type
        component: &'static str,
        /// Name of the component
        name: String,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },

    /// Target references a format that is not declared
    #[error("target '{target}' references unknown format '{format}'")]
    UnknownFormat {
        /// Target path
        target: String,
        /// Format name
        format: String,
    },

    /// Target references a thread pool that is not declared
    #[error("target '{target}' references unknown thread pool '{pool}'")]
    UnknownThreadPool {
        /// Target path
        target: String,
        /// Pool name
        pool: String,
    },

    /// Two enabled targets write the same table in the same file
    #[error("target '{path}' is declared more than once for format '{format}'")]
    DuplicateTarget {
        /// Target path
        path: String,
        /// Format name
        format: String,
    },

    /// A predefined format name was redeclared
    #[error("format name '{0}' is reserved")]
    ReservedFormat(String),
}

impl ConfigError {
    /// Create a missing field error
    pub fn missing_field(component: &'static str, name: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            component,
            name: name.into(),
            field,
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            name: name.into(),
            field,
            message: message.into(),
        }
    }
}
