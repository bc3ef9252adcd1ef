use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};

/// An immutable, column-oriented set of rows produced from one input file.
///
/// Every pipeline stage consumes a `RecordSet` and hands back a new one; values start
/// out as nullable UTF-8 columns and only change type in the coercion stage.
#[derive(Debug, Clone)]
pub struct RecordSet {
    batch: RecordBatch,
}

impl RecordSet {
    pub fn try_new(columns: Vec<(String, ArrayRef)>) -> Result<Self, ArrowError> {
        let num_rows = columns.first().map(|(_, a)| a.len()).unwrap_or(0);
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        let arrays = columns.into_iter().map(|(_, array)| array).collect();

        // Keep the row count explicit so zero-column sets still know how many rows they have
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields)),
            arrays,
            &options,
        )?;
        Ok(Self { batch })
    }

    /// Build an all-text record set from a header and row-major values.
    pub fn from_text_rows(
        header: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    ) -> Result<Self, ArrowError> {
        let columns = header
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: StringArray = rows
                    .iter()
                    .map(|row| row.get(idx).cloned().flatten())
                    .collect();
                (name, Arc::new(values) as ArrayRef)
            })
            .collect();

        Self::try_new(columns)
    }

    pub fn from_batch(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Index of a column by name. When several columns share a name the last one
    /// wins, which matches "later header overwrites the earlier one".
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.batch
            .schema()
            .fields()
            .iter()
            .rposition(|f| f.name() == name)
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.index_of(name).map(|idx| self.batch.column(idx))
    }

    pub fn data_type(&self, name: &str) -> Option<DataType> {
        self.column(name).map(|a| a.data_type().clone())
    }

    /// Same data under new column names (positional).
    pub fn with_column_names(&self, names: Vec<String>) -> Result<Self, ArrowError> {
        if names.len() != self.num_columns() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "expected {} column names, got {}",
                self.num_columns(),
                names.len()
            )));
        }

        Self::try_new(
            names
                .into_iter()
                .zip(self.batch.columns().iter().cloned())
                .collect(),
        )
    }

    // Convenience accessor for text columns, mostly useful in tests and previews
    pub fn text_values(&self, name: &str) -> Option<Vec<Option<String>>> {
        let array = self.column(name)?;
        let strings = array.as_any().downcast_ref::<StringArray>()?;
        Some(
            strings
                .iter()
                .map(|v| v.map(|s| s.to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RecordSet {
        RecordSet::from_text_rows(
            vec!["a".to_string(), "b".to_string(), "a".to_string()],
            vec![
                vec![Some("1".to_string()), None, Some("x".to_string())],
                vec![Some("2".to_string()), Some("y".to_string()), None],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_names_resolve_to_last() {
        let records = sample();
        assert_eq!(records.index_of("a"), Some(2));
        assert_eq!(
            records.text_values("a").unwrap(),
            vec![Some("x".to_string()), None]
        );
    }

    #[test]
    fn test_rename_keeps_data() {
        let records = sample()
            .with_column_names(vec!["x".into(), "y".into(), "z".into()])
            .unwrap();
        assert_eq!(records.column_names(), vec!["x", "y", "z"]);
        assert_eq!(records.num_rows(), 2);
        assert!(sample().with_column_names(vec!["only".into()]).is_err());
    }

    #[test]
    fn test_empty_columns_keep_row_count() {
        let records = RecordSet::try_new(vec![]).unwrap();
        assert_eq!(records.num_rows(), 0);
        assert_eq!(records.num_columns(), 0);
    }
}
