//! Validation tests

use std::str::FromStr;

use crate::{Config, ConfigError};

fn parse(toml: &str) -> Result<Config, ConfigError> {
    Config::from_str(toml)
}

// ============================================================================
// Formats
// ============================================================================

#[test]
fn test_format_without_columns_rejected() {
    let err = parse("[formats.empty]\ncolumns = []\n").unwrap_err();
    assert!(err.to_string().contains("at least one column"));
}

#[test]
fn test_duplicate_column_rejected() {
    let err = parse("[formats.dup]\ncolumns = [\"$status\", \"$status\"]\n").unwrap_err();
    assert!(err.to_string().contains("duplicate column"));
}

#[test]
fn test_dangling_type_rejected() {
    let err = parse("[formats.bad]\ncolumns = [\"INTEGER\", \"$status\"]\n").unwrap_err();
    assert!(err.to_string().contains("no column"));
}

#[test]
fn test_combined_is_reserved() {
    let err = parse("[formats.combined]\ncolumns = [\"$status\"]\n").unwrap_err();
    assert!(matches!(err, ConfigError::ReservedFormat(_)));
}

#[test]
fn test_bad_identifiers_rejected() {
    let err = parse("[formats.f]\ntable = \"drop table\"\ncolumns = [\"$status\"]\n").unwrap_err();
    assert!(err.to_string().contains("table"));

    let err = parse("[formats.f]\ncolumns = [{ name = \"a-b\" }]\n").unwrap_err();
    assert!(err.to_string().contains("a-b"));
}

// ============================================================================
// Targets
// ============================================================================

#[test]
fn test_target_requires_path() {
    let err = parse("[[targets]]\nformat = \"combined\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { field: "path", .. }));
}

#[test]
fn test_defaults_cannot_set_path() {
    let err = parse("[defaults]\npath = \"/tmp/a.db\"\n").unwrap_err();
    assert!(err.to_string().contains("defaults"));
}

#[test]
fn test_unknown_format_rejected() {
    let err = parse("[[targets]]\npath = \"/tmp/a.db\"\nformat = \"nope\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::UnknownFormat { .. }));
}

#[test]
fn test_unknown_pool_rejected() {
    let err = parse("[[targets]]\npath = \"/tmp/a.db\"\nasync = \"io\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::UnknownThreadPool { .. }));

    // default pool needs no declaration
    assert!(parse("[[targets]]\npath = \"/tmp/a.db\"\nasync = true\n").is_ok());
}

#[test]
fn test_buffer_limits() {
    let err = parse("[[targets]]\npath = \"/tmp/a.db\"\nbuffer = \"16k\"\n").unwrap_err();
    assert!(err.to_string().contains("below the minimum"));

    let err = parse("[[targets]]\npath = \"/tmp/a.db\"\nbuffer = \"32k\"\nmax = 0\n").unwrap_err();
    assert!(err.to_string().contains("greater than zero"));

    let err =
        parse("[[targets]]\npath = \"/tmp/a.db\"\nbuffer = \"32k\"\nflush = \"500ms\"\n").unwrap_err();
    assert!(err.to_string().contains("shorter than one second"));

    let err = parse("[[targets]]\npath = \"/tmp/a.db\"\nmax = 5\n").unwrap_err();
    assert!(err.to_string().contains("requires buffer"));

    assert!(parse("[[targets]]\npath = \"/tmp/a.db\"\nbuffer = \"32k\"\nmax = 5\nflush = \"1s\"\n").is_ok());
}

#[test]
fn test_limits_inherited_from_defaults_are_checked() {
    let err = parse("[defaults]\nflush = \"500ms\"\n\n[[targets]]\npath = \"/tmp/a.db\"\nbuffer = \"32k\"\n")
        .unwrap_err();
    assert!(err.to_string().contains("shorter than one second"));
}

#[test]
fn test_default_limits_skip_unbuffered_targets() {
    let config = parse(
        "[defaults]\nmax = 10\nflush = \"2s\"\n\n[[targets]]\npath = \"/tmp/a.db\"\n\n[[targets]]\npath = \"/tmp/b.db\"\nbuffer = \"32k\"\n",
    )
    .unwrap();

    let targets = config.effective_targets();
    assert_eq!(targets[0].max, None);
    assert_eq!(targets[0].flush, None);
    assert_eq!(targets[1].max, Some(10));
    assert_eq!(targets[1].flush, Some(std::time::Duration::from_secs(2)));
}

#[test]
fn test_duplicate_target_rejected() {
    let err = parse("[[targets]]\npath = \"/tmp/a.db\"\n\n[[targets]]\npath = \"/tmp/a.db\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateTarget { .. }));
}

#[test]
fn test_disabled_target_skips_checks() {
    let config = parse("[[targets]]\npath = \"off\"\nformat = \"nope\"\n").unwrap();
    assert!(!config.effective_targets()[0].is_enabled());
}

#[test]
fn test_zero_thread_pool_rejected() {
    let err = parse("[thread_pools.io]\nthreads = 0\n").unwrap_err();
    assert!(err.to_string().contains("threads"));
}
