use std::time::Duration;

use arrow::util::pretty::pretty_format_batches;
use async_trait::async_trait;
use itertools::Itertools;
use sqlx::{
    migrate::MigrateDatabase, postgres::PgPoolOptions, Executor, PgPool, Postgres,
    QueryBuilder, Row,
};
use tracing::{debug, info};

use crate::data_types::{
    BackendKind, BaseType, ColumnSchema, RowCount, TableDescriptor, TableSchema,
};
use crate::implement_table_store;
use crate::records::RecordSet;

use super::{
    default::{insert_rows, rows_per_insert, typed_records, SqlValue, StoreQueries},
    interface::TableStore,
    quote_identifier, Error, Result, SchemaScript,
};

pub const DEFAULT_SCHEMA: &str = "public";

/// Client/server backend. Every table lives in one schema, which is created on
/// connect and put first on the `search_path`.
#[derive(Debug)]
pub struct PostgresStore {
    pub executor: PgPool,
    pub schema_name: String,
}

impl PostgresStore {
    pub const BACKEND: BackendKind = BackendKind::Postgres;
    pub const QUERIES: StoreQueries = StoreQueries {
        table_exists: "SELECT COUNT(*) FROM information_schema.tables \
            WHERE table_schema::text = current_schema() AND table_name::text = $1",
        // udt_name gives the short type names (int4, varchar, float8...) that can be
        // used in a cast
        table_columns: r#"SELECT
                column_name::text AS name,
                CASE WHEN character_maximum_length IS NULL THEN udt_name::text
                     ELSE udt_name::text || '(' || character_maximum_length::text || ')'
                END AS declared_type
            FROM information_schema.columns
            WHERE table_schema::text = current_schema() AND table_name::text = $1
            ORDER BY ordinal_position"#,
        list_tables: "SELECT table_name::text FROM information_schema.tables \
            WHERE table_schema::text = current_schema() AND table_type = 'BASE TABLE' \
            ORDER BY 1",
        bind_limit: 65535,
    };

    const DEPENDENT_VIEWS: &'static str = r#"SELECT DISTINCT
            view_ns.nspname::text AS view_schema,
            view_class.relname::text AS view_name
        FROM pg_depend
        JOIN pg_rewrite ON pg_depend.objid = pg_rewrite.oid
        JOIN pg_class AS view_class ON pg_rewrite.ev_class = view_class.oid
        JOIN pg_namespace AS view_ns ON view_class.relnamespace = view_ns.oid
        JOIN pg_class AS source_class ON pg_depend.refobjid = source_class.oid
        JOIN pg_namespace AS source_ns ON source_class.relnamespace = source_ns.oid
        WHERE source_ns.nspname::text = current_schema()
            AND source_class.relname::text = $1
            AND view_class.oid <> source_class.oid"#;

    /// Connect, creating the database and the schema if needed.
    pub async fn try_new(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        if !Postgres::database_exists(&dsn).await? {
            let _ = Postgres::create_database(&dsn).await;
        }

        let store = PostgresStore::connect(dsn, schema_name.clone()).await?;

        store
            .executor
            .execute(
                format!(
                    "CREATE SCHEMA IF NOT EXISTS {};",
                    quote_identifier(&schema_name)
                )
                .as_str(),
            )
            .await?;

        info!("Connected to PostgreSQL, loading into schema {schema_name}");
        Ok(store)
    }

    pub async fn connect(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        let schema_name_2 = schema_name.clone();

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .idle_timeout(Duration::from_millis(30000))
            .test_before_acquire(true)
            .after_connect(move |c, _m| {
                let schema_name = quote_identifier(&schema_name);
                Box::pin(async move {
                    let query = format!("SET search_path TO {schema_name},public;");
                    c.execute(sqlx::query(&query)).await?;
                    Ok(())
                })
            })
            .connect(&dsn)
            .await?;

        Ok(Self {
            executor: pool,
            schema_name: schema_name_2,
        })
    }

    fn namespace(&self) -> &str {
        &self.schema_name
    }

    // Bound values are typed by their Rust type, so anything that isn't one of the
    // coerced families goes in as text and needs an explicit cast
    fn placeholder_cast(column: &ColumnSchema) -> Option<String> {
        match &column.base_type {
            BaseType::Other(type_name) => Some(format!("::{type_name}")),
            _ => None,
        }
    }

    /// Drop the table (and any views depending on it) if it exists, then recreate
    /// it, all in one transaction.
    async fn create_table_inner(&self, script: &SchemaScript) -> Result<()> {
        let table = &script.table_name;
        let mut tx = self.executor.begin().await?;

        let views = sqlx::query(Self::DEPENDENT_VIEWS)
            .bind(table)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("view_schema")?,
                    row.try_get::<String, _>("view_name")?,
                ))
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        for (schema, view) in &views {
            info!("Dropping view {schema}.{view}, which depends on {table}");
            let query = format!(
                "DROP VIEW IF EXISTS {}.{} CASCADE",
                quote_identifier(schema),
                quote_identifier(view)
            );
            (&mut *tx).execute(query.as_str()).await?;
        }

        let query = format!("DROP TABLE IF EXISTS {} CASCADE", quote_identifier(table));
        (&mut *tx).execute(query.as_str()).await?;
        (&mut *tx).execute(script.sql.as_str()).await?;
        tx.commit().await?;

        info!("Created table {table} from {}", script.path.display());
        Ok(())
    }

    pub fn interpret_error(table: &str, error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            // Class 23: integrity constraint violation
            if d.code().map(|c| c.starts_with("23")).unwrap_or(false) {
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

implement_table_store!(PostgresStore);
