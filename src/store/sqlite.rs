use std::str::FromStr;

use arrow::util::pretty::pretty_format_batches;
use async_trait::async_trait;
use itertools::Itertools;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, Pool, QueryBuilder, Row, Sqlite,
};
use tracing::{debug, info};

use crate::data_types::{BackendKind, ColumnSchema, RowCount, TableDescriptor, TableSchema};
use crate::implement_table_store;
use crate::records::RecordSet;

use super::{
    default::{insert_rows, rows_per_insert, typed_records, SqlValue, StoreQueries},
    interface::TableStore,
    quote_identifier, Error, Result, SchemaScript,
};

/// Embedded backend. Tables live in the `main` database of one SQLite file.
#[derive(Debug)]
pub struct SqliteStore {
    pub executor: Pool<Sqlite>,
}

impl SqliteStore {
    pub const BACKEND: BackendKind = BackendKind::Sqlite;
    pub const QUERIES: StoreQueries = StoreQueries {
        table_exists: "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        table_columns: "SELECT name, type AS declared_type FROM pragma_table_info(?) ORDER BY cid",
        list_tables: "SELECT name FROM sqlite_master \
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        // SQLITE_MAX_VARIABLE_NUMBER since 3.32
        bind_limit: 32766,
    };

    pub async fn connect(dsn: &str) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);

        // Loads run one at a time. A single long-lived connection also keeps
        // `sqlite::memory:` databases alive for the lifetime of the store.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        info!("Connected to SQLite database {dsn}");
        Ok(Self { executor: pool })
    }

    fn namespace(&self) -> &str {
        "main"
    }

    // Dynamic typing: every bound value is stored as-is
    fn placeholder_cast(_column: &ColumnSchema) -> Option<String> {
        None
    }

    async fn create_table_inner(&self, script: &SchemaScript) -> Result<()> {
        let table = &script.table_name;
        if self.table_exists(table).await? {
            info!(
                "Table {table} already exists, leaving it as is (drop it manually to apply {})",
                script.path.display()
            );
            return Ok(());
        }

        self.executor.execute(script.sql.as_str()).await?;
        info!("Created table {table} from {}", script.path.display());
        Ok(())
    }

    pub fn interpret_error(table: &str, error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.sqlite.org/rescode.html
            if d.message().contains("constraint failed") {
                return Error::ConstraintViolation {
                    table: table.to_string(),
                    source: error,
                };
            }
        }
        Error::Insert {
            table: table.to_string(),
            source: error,
        }
    }
}

implement_table_store!(SqliteStore);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use super::super::interface::tests::{run_generic_store_tests, script};
    use super::*;
    use crate::data_types::BaseType;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = Arc::new(memory_store().await);
        run_generic_store_tests(store).await;
    }

    #[tokio::test]
    async fn test_create_is_create_if_absent() {
        let store = memory_store().await;
        store.create_table(&script()).await.unwrap();
        store
            .executor
            .execute("INSERT INTO reclamations (numero) VALUES (7)")
            .await
            .unwrap();

        // Running the script again keeps the loaded rows
        store.create_table(&script()).await.unwrap();
        assert_eq!(store.row_count("reclamations").await.unwrap(), 1);
        assert_eq!(store.descriptor("reclamations").to_string(), "main.reclamations (sqlite)");
    }

    #[tokio::test]
    async fn test_insert_spans_several_statements() {
        let store = memory_store().await;
        let script = SchemaScript::new("wide.sql", "CREATE TABLE wide (a INTEGER, b TEXT)").unwrap();
        store.create_table(&script).await.unwrap();

        let schema = store.get_schema("wide").await.unwrap();
        assert_eq!(schema.columns[1].base_type, BaseType::Text);

        let rows: Vec<Vec<Option<String>>> = (0..2500)
            .map(|i| vec![Some(i.to_string()), Some(format!("row {i}"))])
            .collect();
        let records =
            RecordSet::from_text_rows(vec!["a".to_string(), "b".to_string()], rows).unwrap();

        assert_eq!(
            store.insert_records("wide", &schema, &records).await.unwrap(),
            2500
        );
        assert_eq!(store.row_count("wide").await.unwrap(), 2500);
    }

    #[tokio::test]
    async fn test_failed_insert_is_rolled_back() {
        let store = memory_store().await;
        let script = SchemaScript::new(
            "checked.sql",
            "CREATE TABLE checked (a INTEGER NOT NULL, b TEXT)",
        )
        .unwrap();
        store.create_table(&script).await.unwrap();
        let schema = store.get_schema("checked").await.unwrap();

        let records = RecordSet::from_text_rows(
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![Some("1".to_string()), Some("ok".to_string())],
                vec![None, Some("breaks NOT NULL".to_string())],
            ],
        )
        .unwrap();

        let result = store.insert_records("checked", &schema, &records).await;
        assert!(matches!(result, Err(Error::ConstraintViolation { .. })));
        assert_eq!(store.row_count("checked").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_database_persists_across_connections() {
        let file = NamedTempFile::new().unwrap();
        let dsn = format!("sqlite://{}", file.path().display());

        let store = SqliteStore::connect(&dsn).await.unwrap();
        store.create_table(&script()).await.unwrap();
        store.close().await;

        let store = SqliteStore::connect(&dsn).await.unwrap();
        assert!(store.table_exists("reclamations").await.unwrap());
    }
}
