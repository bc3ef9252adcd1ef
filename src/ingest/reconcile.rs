use std::collections::HashSet;

use arrow::array::new_null_array;
use arrow_schema::DataType;
use itertools::Itertools;
use tracing::warn;

use super::{IngestError, Result};
use crate::data_types::TableSchema;
use crate::records::RecordSet;

/// Columns that had to be added or dropped to fit the destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMismatch {
    /// Destination columns absent from the file, filled with nulls (schema order).
    pub missing: Vec<String>,
    /// File columns absent from the destination, dropped (file order).
    pub extra: Vec<String>,
}

impl SchemaMismatch {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub records: RecordSet,
    pub mismatch: SchemaMismatch,
}

/// Project a normalized record set onto exactly the destination columns, in the
/// destination's order. Never fails on a mismatch: it only warns.
pub fn reconcile(
    file_name: &str,
    records: &RecordSet,
    schema: &TableSchema,
) -> Result<Reconciled> {
    let table_columns: HashSet<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    let file_columns = records.column_names();

    let missing: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| records.index_of(&c.name).is_none())
        .map(|c| c.name.clone())
        .collect();
    let extra: Vec<String> = file_columns
        .iter()
        .filter(|c| !table_columns.contains(c.as_str()))
        .unique()
        .cloned()
        .collect();

    if !missing.is_empty() {
        warn!("Missing columns in {file_name}: {missing:?}");
    }
    if !extra.is_empty() {
        warn!("Extra columns in {file_name}: {extra:?}");
    }

    let num_rows = records.num_rows();
    let columns = schema
        .columns
        .iter()
        .map(|c| {
            let array = records
                .column(&c.name)
                .cloned()
                .unwrap_or_else(|| new_null_array(&DataType::Utf8, num_rows));
            (c.name.clone(), array)
        })
        .collect();

    let records = RecordSet::try_new(columns).map_err(|source| IngestError::Arrow {
        path: file_name.into(),
        source,
    })?;

    Ok(Reconciled {
        records,
        mismatch: SchemaMismatch { missing, extra },
    })
}
