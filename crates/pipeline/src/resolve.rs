//! Configuration resolution
//!
//! Turns a validated [`Config`] into immutable [`TargetSpec`]s in one pass,
//! before the master creates zones and before any worker opens a database.
//! Schemas and init scripts are probed against an in-memory database here,
//! so a broken format fails the whole configuration instead of one worker.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlitelog_config::{Config, FormatConfig, RecoveryMode, ThreadPoolConfig};
use sqlitelog_store::{ColumnSpec, ColumnType, Condition, Database, RecoveryPolicy, TableSchema};

use crate::error::{PipelineError, Result};

/// Everything a worker needs, derived once from the configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Enabled targets, in declaration order
    pub targets: Vec<Arc<TargetSpec>>,
    /// Pools referenced by at least one enabled target
    pub pools: BTreeMap<String, ThreadPoolConfig>,
    pub shm_dir: PathBuf,
    pub busy_timeout: Duration,
    pub checkpoint_on_exit: bool,
    pub recovery: RecoveryPolicy,
}

/// One enabled target
#[derive(Debug, Clone)]
pub struct TargetSpec {
    /// Name used in log lines, the configured path
    pub name: String,
    /// Database file, resolved against the config file's directory
    pub path: PathBuf,
    pub format: String,
    pub schema: Arc<TableSchema>,
    pub init_sql: Option<Arc<str>>,
    pub buffer: Option<BufferSpec>,
    pub condition: Option<Condition>,
    /// Helper pool for inserts, none for inline inserts
    pub pool: Option<String>,
}

/// Shared buffer settings of a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSpec {
    pub zone_path: PathBuf,
    pub size: usize,
    pub max: Option<usize>,
    pub flush: Option<Duration>,
}

/// Resolve every enabled target of a validated configuration
pub fn resolve(config: &Config) -> Result<ResolvedConfig> {
    let mut targets = Vec::new();
    let mut pools = BTreeMap::new();
    let mut zones = HashSet::new();

    for (index, target) in config.effective_targets().iter().enumerate() {
        let name = target.display_name(index);
        if !target.is_enabled() {
            tracing::debug!(target_name = %name, "target disabled, skipping");
            continue;
        }
        let Some(path) = target.path.as_deref() else {
            continue;
        };

        let format_name = target.format_name();
        let format = config
            .format(format_name)
            .ok_or_else(|| sqlitelog_config::ConfigError::UnknownFormat {
                target: name.clone(),
                format: format_name.to_string(),
            })?;
        let schema = build_schema(format_name, &format)?;

        let init_sql = match &target.init {
            Some(init) => Some(load_init_script(&name, &config.resolve_path(init))?),
            None => None,
        };

        Database::probe(&schema, init_sql.as_deref()).map_err(|source| PipelineError::Probe {
            target: name.clone(),
            source,
        })?;

        let buffer = target.buffer.map(|size| BufferSpec {
            zone_path: config.global.shm_dir.join(zone_file_name(format_name, path)),
            size: size.as_usize(),
            max: target.max,
            flush: target.flush,
        });

        if let Some(buffer) = &buffer
            && !zones.insert(buffer.zone_path.clone())
        {
            return Err(PipelineError::DuplicateZone {
                target: name,
                path: buffer.zone_path.display().to_string(),
            });
        }

        let pool = target.pool_name().map(str::to_string);
        if let Some(pool_name) = &pool
            && !pools.contains_key(pool_name)
        {
            let pool_config = config.thread_pool(pool_name).ok_or_else(|| {
                sqlitelog_config::ConfigError::UnknownThreadPool {
                    target: name.clone(),
                    pool: pool_name.clone(),
                }
            })?;
            pools.insert(pool_name.clone(), pool_config);
        }

        tracing::debug!(
            target_name = %name,
            format = %format_name,
            table = %schema.table(),
            buffered = buffer.is_some(),
            pool = pool.as_deref().unwrap_or("-"),
            "target resolved"
        );

        targets.push(Arc::new(TargetSpec {
            path: config.resolve_path(Path::new(path)),
            name,
            format: format_name.to_string(),
            schema: Arc::new(schema),
            init_sql,
            buffer,
            condition: target.condition.as_deref().map(Condition::parse),
            pool,
        }));
    }

    Ok(ResolvedConfig {
        targets,
        pools,
        shm_dir: config.global.shm_dir.clone(),
        busy_timeout: config.global.busy_timeout,
        checkpoint_on_exit: config.global.checkpoint_on_exit,
        recovery: match config.global.recovery {
            RecoveryMode::FileMoved => RecoveryPolicy::FileMoved,
            RecoveryMode::FileMovedOrUnclassified => RecoveryPolicy::FileMovedOrUnclassified,
        },
    })
}

/// Table schema for a format declared under `name`
pub fn build_schema(name: &str, format: &FormatConfig) -> Result<TableSchema> {
    let decls = format.column_decls().map_err(|message| PipelineError::Format {
        format: name.to_string(),
        message,
    })?;

    let columns = decls
        .iter()
        .map(|d| ColumnSpec::new(d.name.as_str(), d.sql_type.as_deref().map(ColumnType::parse)))
        .collect();

    TableSchema::new(format.table_name(name), columns).map_err(|source| PipelineError::Schema {
        format: name.to_string(),
        source,
    })
}

/// Zone file name: `sqlitelog_<format>-<path>`
///
/// Bytes outside `[A-Za-z0-9.]` are written as `_XX` (upper-case hex), so
/// distinct format/path pairs never share a zone file.
pub fn zone_file_name(format: &str, path: &str) -> String {
    format!("sqlitelog_{}-{}", escape_zone_part(format), escape_zone_part(path))
}

fn escape_zone_part(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || b == b'.' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("_{b:02X}"));
        }
    }
    out
}

fn load_init_script(target: &str, path: &Path) -> Result<Arc<str>> {
    std::fs::read_to_string(path)
        .map(Arc::from)
        .map_err(|source| PipelineError::InitScript {
            target: target.to_string(),
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
#[path = "resolve_test.rs"]
mod resolve_test;
