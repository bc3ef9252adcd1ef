use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use super::{Error, Result};

lazy_static! {
    static ref CREATE_TABLE: Regex = Regex::new(
        r#"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:(?:"[^"]+"|\w+)\s*\.\s*)?("[^"]+"|\w+)"#
    )
    .unwrap();
}

/// Name of the table a CREATE TABLE statement defines, unquoted. Schema
/// qualifiers are dropped.
pub fn extract_table_name(sql: &str) -> Option<String> {
    CREATE_TABLE
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_matches('"').to_string())
}

/// A `.sql` file holding one CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaScript {
    pub path: PathBuf,
    pub sql: String,
    pub table_name: String,
}

impl SchemaScript {
    pub fn new(path: impl Into<PathBuf>, sql: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let sql = sql.into();
        match extract_table_name(&sql) {
            Some(table_name) => Ok(Self {
                path,
                sql,
                table_name,
            }),
            None => Err(Error::MissingCreateTable { path }),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let sql = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(path, sql)
    }
}
