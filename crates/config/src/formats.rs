//! Log formats: the table and columns a target writes
//!
//! Columns are declared either as tokens in request-variable style or as
//! tables:
//!
//! ```toml
//! [formats.access]
//! table = "access"
//! columns = ["$remote_addr", "$binary_remote_addr BLOB", { name = "status", type = "INTEGER" }]
//! ```
//!
//! A bare type token applies to the column declared right before it, so
//! `["$bytes", "INTEGER"]` is the same as `["$bytes INTEGER"]`.

use serde::Deserialize;

/// Name of the predefined format
pub const COMBINED_FORMAT: &str = "combined";

/// Columns of the predefined `combined` format, in order
pub const COMBINED_COLUMNS: &[&str] = &[
    "remote_addr",
    "remote_user",
    "time_local",
    "request",
    "status",
    "body_bytes_sent",
    "http_referer",
    "http_user_agent",
];

/// One entry of a format's `columns` array
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColumnEntry {
    /// `"$name"`, `"$name TYPE"` or a lone `"TYPE"` token
    Token(String),
    /// `{ name = "...", type = "..." }`
    Table {
        name: String,
        #[serde(rename = "type")]
        sql_type: Option<String>,
    },
}

/// A column after token parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDecl {
    /// Request variable name, also the column name
    pub name: String,
    /// Declared SQL type, inferred from the name when absent
    pub sql_type: Option<String>,
}

impl ColumnDecl {
    fn new(name: &str, sql_type: Option<&str>) -> Self {
        Self {
            name: name.trim_start_matches('$').to_string(),
            sql_type: sql_type.map(str::to_string),
        }
    }
}

/// `[formats.<name>]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Table name
    /// Default: the format name
    pub table: Option<String>,

    /// Column declarations in table order
    pub columns: Vec<ColumnEntry>,
}

impl FormatConfig {
    /// The predefined `combined` format
    pub fn combined() -> Self {
        Self {
            table: Some(COMBINED_FORMAT.to_string()),
            columns: COMBINED_COLUMNS
                .iter()
                .map(|name| ColumnEntry::Token(format!("${name}")))
                .collect(),
        }
    }

    /// Table name for a format declared under `name`
    pub fn table_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.table.as_deref().unwrap_or(name)
    }

    /// Flatten `columns` into declarations
    ///
    /// # Errors
    ///
    /// Returns a message for a type token with no column before it, or for
    /// a column that already has a type.
    pub fn column_decls(&self) -> Result<Vec<ColumnDecl>, String> {
        let mut decls: Vec<ColumnDecl> = Vec::with_capacity(self.columns.len());
        // Set while the last declared column may still take a type token
        let mut open = false;

        for entry in &self.columns {
            match entry {
                ColumnEntry::Table { name, sql_type } => {
                    decls.push(ColumnDecl::new(name, sql_type.as_deref()));
                    open = sql_type.is_none();
                }
                ColumnEntry::Token(token) => {
                    for word in token.split_whitespace() {
                        if word.starts_with('$') {
                            decls.push(ColumnDecl::new(word, None));
                            open = true;
                        } else if open {
                            if let Some(last) = decls.last_mut() {
                                last.sql_type = Some(word.to_string());
                            }
                            open = false;
                        } else {
                            return Err(format!("type \"{word}\" has no column to apply to"));
                        }
                    }
                }
            }
        }

        Ok(decls)
    }
}
