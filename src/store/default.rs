//! Shared implementation of [`TableStore`](super::TableStore) for the sqlx-backed stores.
//!
//! The store has to provide:
//!
//! ```ignore
//! pub struct MyStore {
//!     pub executor: sqlx::Pool<sqlx::SqlxDatabaseType>,
//! }
//!
//! impl MyStore {
//!     pub const BACKEND: BackendKind = ...;
//!     pub const QUERIES: StoreQueries = StoreQueries { ... };
//!     fn namespace(&self) -> &str { ... }
//!     fn placeholder_cast(column: &ColumnSchema) -> Option<String> { ... }
//!     async fn create_table_inner(&self, script: &SchemaScript) -> Result<()> { ... }
//!     pub fn interpret_error(table: &str, error: sqlx::Error) -> Error { ... }
//! }
//!
//! implement_table_store!(MyStore);
//! ```
//!
//! A macro rather than a generic impl: a `QueryBuilder` over a generic database
//! needs a wall of `where` clauses and still trips the borrow checker
//! (https://github.com/launchbadge/sqlx/issues/1978).
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float64Array, Int64Array,
    StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{Date32Type, Float64Type, Int64Type};
use arrow::temporal_conversions::date32_to_datetime;
use arrow_schema::{ArrowError, DataType};
use chrono::NaiveDate;

use crate::data_types::{TableSchema, TypeFamily};
use crate::records::RecordSet;

/// Queries that differ between SQLite and PostgreSQL. Each takes the table name as
/// its only bind parameter, except `list_tables` which takes none.
pub struct StoreQueries {
    pub table_exists: &'static str,
    /// Must return `name` and `declared_type` columns, in declaration order.
    pub table_columns: &'static str,
    pub list_tables: &'static str,
    /// Maximum number of bind parameters in one statement.
    pub bind_limit: usize,
}

pub const MAX_ROWS_PER_INSERT: usize = 1000;

// Dates come back as `YYYY-MM-DD`, possibly followed by a time part
const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

pub fn rows_per_insert(bind_limit: usize, num_columns: usize) -> usize {
    (bind_limit / num_columns.max(1)).clamp(1, MAX_ROWS_PER_INSERT)
}

/// An owned value ready to be bound to an INSERT placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(Option<i64>),
    Float(Option<f64>),
    Boolean(Option<bool>),
    Date(Option<NaiveDate>),
    Text(Option<String>),
}

fn column_values(array: &ArrayRef) -> Result<Vec<SqlValue>, ArrowError> {
    let values = match array.data_type() {
        DataType::Int64 => array
            .as_primitive::<Int64Type>()
            .iter()
            .map(SqlValue::Integer)
            .collect(),
        DataType::Float64 => array
            .as_primitive::<Float64Type>()
            .iter()
            .map(SqlValue::Float)
            .collect(),
        DataType::Boolean => array.as_boolean().iter().map(SqlValue::Boolean).collect(),
        DataType::Date32 => array
            .as_primitive::<Date32Type>()
            .iter()
            .map(|v| SqlValue::Date(v.and_then(date32_to_datetime).map(|d| d.date())))
            .collect(),
        _ => cast(array, &DataType::Utf8)?
            .as_string::<i32>()
            .iter()
            .map(|v| SqlValue::Text(v.map(str::to_string)))
            .collect(),
    };
    Ok(values)
}

/// Row-major values for the given columns. Columns the record set doesn't have are
/// bound as NULL.
pub fn insert_rows(
    records: &RecordSet,
    columns: &[&str],
) -> Result<Vec<Vec<SqlValue>>, ArrowError> {
    let num_rows = records.num_rows();
    let by_column = columns
        .iter()
        .map(|name| match records.column(name) {
            Some(array) => column_values(array),
            None => Ok(vec![SqlValue::Text(None); num_rows]),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((0..num_rows)
        .map(|row| by_column.iter().map(|c| c[row].clone()).collect())
        .collect())
}

fn parse_all<T>(
    values: &[Option<&str>],
    parse: impl Fn(&str) -> Option<T>,
) -> Option<Vec<Option<T>>> {
    values
        .iter()
        .map(|v| match *v {
            None => Some(None),
            Some(v) => parse(v).map(Some),
        })
        .collect()
}

fn parse_stored_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

fn parse_stored_date(value: &str) -> Option<NaiveDate> {
    let date = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date, STORED_DATE_FORMAT).ok()
}

/// Build a typed record set out of rows fetched as text, using the table's column
/// families. A column with a value that doesn't parse stays text.
pub fn typed_records(
    schema: &TableSchema,
    rows: Vec<Vec<Option<String>>>,
) -> Result<RecordSet, ArrowError> {
    let columns = schema
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let values: Vec<Option<&str>> = rows
                .iter()
                .map(|row| row.get(idx).and_then(|v| v.as_deref()))
                .collect();

            let typed: Option<ArrayRef> = match column.family() {
                TypeFamily::Integer => parse_all(&values, |v| v.parse::<i64>().ok())
                    .map(|v| Arc::new(Int64Array::from(v)) as ArrayRef),
                TypeFamily::Floating => parse_all(&values, |v| v.parse::<f64>().ok())
                    .map(|v| Arc::new(Float64Array::from(v)) as ArrayRef),
                TypeFamily::Boolean => parse_all(&values, parse_stored_bool)
                    .map(|v| Arc::new(BooleanArray::from(v)) as ArrayRef),
                TypeFamily::CalendarDate => parse_all(&values, parse_stored_date).map(|v| {
                    Arc::new(Date32Array::from(
                        v.into_iter()
                            .map(|d| d.map(Date32Type::from_naive_date))
                            .collect::<Vec<_>>(),
                    )) as ArrayRef
                }),
                TypeFamily::String | TypeFamily::Unmapped => None,
            };

            let array =
                typed.unwrap_or_else(|| Arc::new(StringArray::from(values)) as ArrayRef);
            (column.name.clone(), array)
        })
        .collect();

    RecordSet::try_new(columns)
}

#[macro_export]
macro_rules! implement_table_store {
    ($store: ident) => {
impl $store {
    async fn select_records(&self, table: &str, limit: Option<usize>) -> Result<RecordSet> {
        let schema = self.get_schema(table).await?;
        let select = schema
            .columns
            .iter()
            .map(|c| {
                let name = quote_identifier(&c.name);
                format!("CAST({name} AS TEXT) AS {name}")
            })
            .join(", ");
        let mut query = format!("SELECT {select} FROM {}", quote_identifier(table));
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = sqlx::query(&query)
            .fetch_all(&self.executor)
            .await?
            .iter()
            .map(|row| {
                (0..schema.columns.len())
                    .map(|idx| row.try_get::<Option<String>, _>(idx))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(typed_records(&schema, rows)?)
    }
}

#[async_trait]
impl TableStore for $store {
    fn descriptor(&self, table: &str) -> TableDescriptor {
        TableDescriptor {
            name: table.to_string(),
            namespace: self.namespace().to_string(),
            backend: $store::BACKEND,
        }
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query($store::QUERIES.table_exists)
            .bind(table)
            .fetch_one(&self.executor)
            .await?
            .try_get(0)?;
        Ok(count > 0)
    }

    async fn create_table(&self, script: &SchemaScript) -> Result<()> {
        self.create_table_inner(script).await
    }

    async fn get_schema(&self, table: &str) -> Result<TableSchema> {
        let columns = sqlx::query($store::QUERIES.table_columns)
            .bind(table)
            .fetch_all(&self.executor)
            .await?
            .iter()
            .map(|row| {
                let name: String = row.try_get("name")?;
                let declared: Option<String> = row.try_get("declared_type")?;
                Ok(ColumnSchema::from_declared(name, &declared.unwrap_or_default()))
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        if columns.is_empty() {
            return Err(Error::TableDoesNotExist {
                name: table.to_string(),
            });
        }

        Ok(TableSchema {
            table: table.to_string(),
            columns,
        })
    }

    async fn row_count(&self, table: &str) -> Result<RowCount> {
        let query = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let count: i64 = sqlx::query(&query)
            .fetch_one(&self.executor)
            .await?
            .try_get(0)?;
        Ok(count)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = sqlx::query($store::QUERIES.list_tables)
            .fetch_all(&self.executor)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    async fn insert_records(
        &self,
        table: &str,
        schema: &TableSchema,
        records: &RecordSet,
    ) -> Result<RowCount> {
        let columns = schema.column_names();
        if records.num_rows() == 0 || columns.is_empty() {
            return Ok(0);
        }

        let rows = insert_rows(records, &columns)?;
        let casts: Vec<Option<String>> =
            schema.columns.iter().map($store::placeholder_cast).collect();
        let insert = format!(
            "INSERT INTO {} ({}) ",
            quote_identifier(table),
            columns.iter().map(|c| quote_identifier(c)).join(", ")
        );
        let chunk_size = rows_per_insert($store::QUERIES.bind_limit, columns.len());

        let mut tx = self.executor.begin().await?;
        for chunk in rows.chunks(chunk_size) {
            let mut builder: QueryBuilder<_> = QueryBuilder::new(&insert);
            builder.push_values(chunk, |mut b, row| {
                for (value, cast) in row.iter().zip(&casts) {
                    match value.clone() {
                        SqlValue::Integer(v) => b.push_bind(v),
                        SqlValue::Float(v) => b.push_bind(v),
                        SqlValue::Boolean(v) => b.push_bind(v),
                        SqlValue::Date(v) => b.push_bind(v),
                        SqlValue::Text(v) => b.push_bind(v),
                    };
                    if let Some(cast) = cast {
                        b.push_unseparated(cast);
                    }
                }
            });

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| $store::interpret_error(table, e))?;
        }
        tx.commit()
            .await
            .map_err(|e| $store::interpret_error(table, e))?;

        debug!("Inserted {} row(s) into {table} in chunks of {chunk_size}", rows.len());
        Ok(rows.len() as RowCount)
    }

    async fn fetch_all(&self, table: &str) -> Result<RecordSet> {
        self.select_records(table, None).await
    }

    async fn preview(&self, table: &str, limit: usize) -> Result<RecordSet> {
        let records = self.select_records(table, Some(limit)).await?;
        let formatted = pretty_format_batches(&[records.batch().clone()])?;
        info!("First {} row(s) of {table}:\n{formatted}", records.num_rows());
        Ok(records)
    }

    async fn close(&self) {
        self.executor.close().await;
    }
}
    };
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::data_types::{BaseType, ColumnSchema};

    #[rstest]
    #[case::wide_sqlite(32766, 5, 1000)]
    #[case::very_wide_sqlite(32766, 100, 327)]
    #[case::pg(65535, 70, 936)]
    #[case::huge(10, 100, 1)]
    fn test_rows_per_insert(
        #[case] bind_limit: usize,
        #[case] columns: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(rows_per_insert(bind_limit, columns), expected);
    }

    #[test]
    fn test_insert_rows_fills_missing_columns() {
        let records = RecordSet::try_new(vec![
            (
                "n".to_string(),
                Arc::new(Int64Array::from(vec![Some(1), None])) as ArrayRef,
            ),
            (
                "d".to_string(),
                Arc::new(Date32Array::from(vec![Some(19722), None])) as ArrayRef,
            ),
        ])
        .unwrap();

        let rows = insert_rows(&records, &["n", "d", "absent"]).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![
                    SqlValue::Integer(Some(1)),
                    SqlValue::Date(NaiveDate::from_ymd_opt(2023, 12, 31)),
                    SqlValue::Text(None)
                ],
                vec![
                    SqlValue::Integer(None),
                    SqlValue::Date(None),
                    SqlValue::Text(None)
                ],
            ]
        );
    }

    #[test]
    fn test_typed_records() {
        let schema = TableSchema {
            table: "t".to_string(),
            columns: vec![
                ColumnSchema::new("n", BaseType::Integer, None),
                ColumnSchema::new("b", BaseType::Boolean, None),
                ColumnSchema::new("d", BaseType::Timestamp, None),
                ColumnSchema::new("bad", BaseType::Integer, None),
            ],
        };
        let row = |values: [Option<&str>; 4]| {
            values
                .iter()
                .map(|v| v.map(String::from))
                .collect::<Vec<_>>()
        };

        let records = typed_records(
            &schema,
            vec![
                row([Some("3"), Some("1"), Some("2023-12-31 00:00:00"), Some("4")]),
                row([None, Some("false"), None, Some("douze")]),
            ],
        )
        .unwrap();

        assert_eq!(records.data_type("n"), Some(DataType::Int64));
        assert_eq!(records.data_type("b"), Some(DataType::Boolean));
        assert_eq!(records.data_type("d"), Some(DataType::Date32));
        assert_eq!(records.data_type("bad"), Some(DataType::Utf8));
        assert_eq!(
            records.text_values("bad").unwrap(),
            vec![Some("4".to_string()), Some("douze".to_string())]
        );
    }
}
