use std::path::{Path, PathBuf};

use arrow_schema::ArrowError;

use crate::data_types::RowCount;
use crate::ingest::IngestError;

pub mod default;
pub mod interface;
#[cfg(feature = "catalog-postgres")]
pub mod postgres;
pub mod script;
pub mod sqlite;

pub use interface::TableStore;
#[cfg(feature = "catalog-postgres")]
pub use postgres::PostgresStore;
pub use script::SchemaScript;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Internal SQL error: {0:?}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Failed assembling records: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Failed reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Can't derive a table name from {path:?}")]
    MissingTableName { path: PathBuf },

    #[error("No CREATE TABLE statement found in {path:?}")]
    MissingCreateTable { path: PathBuf },

    #[error("Table {name:?} doesn't exist")]
    TableDoesNotExist { name: String },

    #[error("Constraint violated while inserting into {table:?}: {source}")]
    ConstraintViolation {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Insert into {table:?} failed: {source}")]
    Insert {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No destination table; nothing is ever created from the file's shape.
    TableAbsent { table: String },
    /// The table already had rows, so the insert was skipped.
    AlreadyLoaded { table: String, rows: RowCount },
    Inserted { table: String, rows: RowCount },
}

impl LoadOutcome {
    pub fn table(&self) -> &str {
        match self {
            LoadOutcome::TableAbsent { table }
            | LoadOutcome::AlreadyLoaded { table, .. }
            | LoadOutcome::Inserted { table, .. } => table,
        }
    }
}

/// Destination table of an input file: its base name without the extension.
pub fn table_name_for(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingTableName {
            path: path.to_path_buf(),
        })
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("in/reclamations.csv", Some("reclamations"))]
    #[case::double_extension("in/archive.2023.csv", Some("archive.2023"))]
    #[case::no_extension("in/plain", Some("plain"))]
    #[case::no_name("", None)]
    fn test_table_name_for(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            table_name_for(Path::new(path)).ok().as_deref(),
            expected
        );
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("t"), "\"t\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
