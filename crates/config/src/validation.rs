//! Configuration validation
//!
//! Checks that need the whole file:
//! - formats declare at least one column, no duplicates, valid identifiers
//! - the predefined `combined` format is not redeclared
//! - targets reference known formats and thread pools
//! - buffer limits are usable
//! - no two enabled targets write the same table in the same file

use std::collections::HashSet;
use std::time::Duration;

use crate::Config;
use crate::error::{ConfigError, Result};
use crate::formats::COMBINED_FORMAT;
use crate::pools::DEFAULT_POOL;
use crate::targets::TargetConfig;

/// Smallest shared buffer zone, eight 4 KiB pages
pub const MIN_BUFFER_SIZE: usize = 8 * 4096;

/// Shortest flush interval
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_pools(config)?;
    validate_formats(config)?;
    if config.defaults.path.is_some() {
        return Err(ConfigError::invalid_value(
            "defaults",
            "defaults",
            "path",
            "a path can only be set on a target",
        ));
    }
    validate_targets(config)?;
    Ok(())
}

fn validate_pools(config: &Config) -> Result<()> {
    for (name, pool) in &config.thread_pools {
        if pool.threads == 0 {
            return Err(ConfigError::invalid_value(
                "thread pool",
                name,
                "threads",
                "must be greater than zero",
            ));
        }
        if pool.max_queue == 0 {
            return Err(ConfigError::invalid_value(
                "thread pool",
                name,
                "max_queue",
                "must be greater than zero",
            ));
        }
    }
    Ok(())
}

fn validate_formats(config: &Config) -> Result<()> {
    if config.formats.contains_key(COMBINED_FORMAT) {
        return Err(ConfigError::ReservedFormat(COMBINED_FORMAT.into()));
    }

    for (name, format) in &config.formats {
        let table = format.table_name(name);
        if !is_identifier(table) {
            return Err(ConfigError::invalid_value(
                "format",
                name,
                "table",
                format!("\"{table}\" is not a valid SQL identifier"),
            ));
        }

        let decls = format
            .column_decls()
            .map_err(|message| ConfigError::invalid_value("format", name, "columns", message))?;

        if decls.is_empty() {
            return Err(ConfigError::invalid_value(
                "format",
                name,
                "columns",
                "at least one column is required",
            ));
        }

        let mut seen = HashSet::new();
        for decl in &decls {
            if !is_identifier(&decl.name) {
                return Err(ConfigError::invalid_value(
                    "format",
                    name,
                    "columns",
                    format!("\"{}\" is not a valid column name", decl.name),
                ));
            }
            if !seen.insert(decl.name.as_str()) {
                return Err(ConfigError::invalid_value(
                    "format",
                    name,
                    "columns",
                    format!("duplicate column \"{}\"", decl.name),
                ));
            }
        }
    }
    Ok(())
}

fn validate_targets(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();

    for (index, raw) in config.targets.iter().enumerate() {
        let target = raw.merged_with(&config.defaults);
        let name = target.display_name(index);

        let Some(path) = target.path.as_deref() else {
            return Err(ConfigError::missing_field("target", name, "path"));
        };
        if path.trim().is_empty() {
            return Err(ConfigError::invalid_value("target", name, "path", "must not be empty"));
        }
        if !target.is_enabled() {
            continue;
        }

        let format = target.format_name();
        if format != COMBINED_FORMAT && !config.formats.contains_key(format) {
            return Err(ConfigError::UnknownFormat {
                target: name,
                format: format.to_string(),
            });
        }

        if let Some(pool) = target.pool_name()
            && pool != DEFAULT_POOL
            && !config.thread_pools.contains_key(pool)
        {
            return Err(ConfigError::UnknownThreadPool {
                target: name,
                pool: pool.to_string(),
            });
        }

        validate_buffer(&target, &name)?;

        if !seen.insert((path.to_string(), format.to_string())) {
            return Err(ConfigError::DuplicateTarget {
                path: path.to_string(),
                format: format.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_buffer(target: &TargetConfig, name: &str) -> Result<()> {
    let Some(size) = target.buffer else {
        if target.max.is_some() {
            return Err(ConfigError::invalid_value("target", name, "max", "requires buffer"));
        }
        if target.flush.is_some() {
            return Err(ConfigError::invalid_value("target", name, "flush", "requires buffer"));
        }
        return Ok(());
    };

    if size.as_usize() < MIN_BUFFER_SIZE {
        return Err(ConfigError::invalid_value(
            "target",
            name,
            "buffer",
            format!("{size} bytes is below the minimum of {MIN_BUFFER_SIZE}"),
        ));
    }
    if target.max == Some(0) {
        return Err(ConfigError::invalid_value(
            "target",
            name,
            "max",
            "must be greater than zero",
        ));
    }
    if let Some(flush) = target.flush
        && flush < MIN_FLUSH_INTERVAL
    {
        return Err(ConfigError::invalid_value(
            "target",
            name,
            "flush",
            format!("{}ms is shorter than one second", flush.as_millis()),
        ));
    }
    Ok(())
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
#[path = "validation_test.rs"]
mod validation_test;
