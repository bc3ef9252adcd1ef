use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{table_name_for, LoadOutcome, Result, SchemaScript};
use crate::data_types::{RowCount, TableDescriptor, TableSchema, TableState};
use crate::ingest::{reader::display_name, CsvPipeline};
use crate::records::RecordSet;

/// Lifecycle of destination tables in one backend.
#[async_trait]
pub trait TableStore: Send + Sync + Debug {
    fn descriptor(&self, table: &str) -> TableDescriptor;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Run a schema script. What happens when the table already exists is up to
    /// the backend.
    async fn create_table(&self, script: &SchemaScript) -> Result<()>;

    /// Live column list, in declaration order.
    async fn get_schema(&self, table: &str) -> Result<TableSchema>;

    async fn row_count(&self, table: &str) -> Result<RowCount>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Insert every row in one transaction. Returns the number of rows written.
    async fn insert_records(
        &self,
        table: &str,
        schema: &TableSchema,
        records: &RecordSet,
    ) -> Result<RowCount>;

    async fn fetch_all(&self, table: &str) -> Result<RecordSet>;

    async fn preview(&self, table: &str, limit: usize) -> Result<RecordSet>;

    async fn close(&self);

    async fn show_row_count(&self, table: &str) -> Result<RowCount> {
        let count = self.row_count(table).await?;
        if count == 0 {
            warn!("Table {table} is empty");
        } else {
            info!("Table {table} holds {count} row(s)");
        }
        Ok(count)
    }

    /// Load one input file into the table named after it, at most once per table
    /// lifetime. Missing tables are skipped and populated tables left alone.
    ///
    /// The row count check and the insert are not atomic: two loads racing for the
    /// same empty table can both insert.
    async fn load_file(&self, path: &Path, pipeline: &CsvPipeline) -> Result<LoadOutcome> {
        let table = table_name_for(path)?;
        let file_name = display_name(path);

        if !self.table_exists(&table).await? {
            warn!("Table {table} does not exist, skipping {file_name}");
            return Ok(LoadOutcome::TableAbsent { table });
        }

        let schema = self.get_schema(&table).await?;
        let prepared = pipeline.run(path, &schema)?;

        let state = TableState::from_catalog(true, self.row_count(&table).await?);
        match state {
            TableState::ExistsPopulated(rows) => {
                info!("Table {table} already holds {rows} row(s), skipping {file_name}");
                Ok(LoadOutcome::AlreadyLoaded { table, rows })
            }
            _ => {
                let rows = self
                    .insert_records(&table, &schema, &prepared.records)
                    .await?;
                info!("Loaded {rows} row(s) from {file_name} into {table}");
                Ok(LoadOutcome::Inserted { table, rows })
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use arrow::array::{Array, BooleanArray, Date32Array, Float64Array, Int64Array};
    use chrono::NaiveDate;

    use super::*;
    use crate::data_types::{BaseType, ColumnSchema};
    use crate::store::Error;

    const SCRIPT: &str = r#"CREATE TABLE reclamations (
        numero INTEGER,
        montant DOUBLE PRECISION,
        libelle VARCHAR(8),
        urgent BOOLEAN,
        date_d_envoi DATE
    );"#;

    const INPUT: &str = "Numéro;Montant;Libellé;Urgent;Date d'envoi;Commentaire\n\
        1;12.5;Première réclamation;yes;31-12-2023;x\n\
        ;nan;Deuxième;no;pas une date;y\n";

    pub fn script() -> SchemaScript {
        SchemaScript::new("reclamations.sql", SCRIPT).unwrap()
    }

    async fn test_create_table(store: &dyn TableStore) {
        assert!(!store.table_exists("reclamations").await.unwrap());
        store.create_table(&script()).await.unwrap();
        assert!(store.table_exists("reclamations").await.unwrap());
        assert_eq!(store.list_tables().await.unwrap(), vec!["reclamations"]);

        let schema = store.get_schema("reclamations").await.unwrap();
        assert_eq!(
            schema.column_names(),
            vec!["numero", "montant", "libelle", "urgent", "date_d_envoi"]
        );
        assert_eq!(schema.columns[0].base_type, BaseType::Integer);
        assert_eq!(
            schema.columns[2],
            ColumnSchema::new("libelle", BaseType::Varchar, Some(8))
        );
        assert_eq!(schema.columns[4].base_type, BaseType::Date);

        assert!(matches!(
            store.get_schema("nope").await,
            Err(Error::TableDoesNotExist { .. })
        ));
        assert_eq!(store.row_count("reclamations").await.unwrap(), 0);
    }

    async fn test_load_file_is_idempotent(store: &dyn TableStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reclamations.csv");
        std::fs::write(&path, INPUT).unwrap();
        let pipeline = CsvPipeline::default();

        let first = store.load_file(&path, &pipeline).await.unwrap();
        assert_eq!(
            first,
            LoadOutcome::Inserted {
                table: "reclamations".to_string(),
                rows: 2
            }
        );

        let second = store.load_file(&path, &pipeline).await.unwrap();
        assert_eq!(
            second,
            LoadOutcome::AlreadyLoaded {
                table: "reclamations".to_string(),
                rows: 2
            }
        );
        assert_eq!(store.show_row_count("reclamations").await.unwrap(), 2);

        let absent = dir.path().join("unknown.csv");
        std::fs::write(&absent, "a;b\n1;2\n").unwrap();
        assert_eq!(
            store.load_file(&absent, &pipeline).await.unwrap(),
            LoadOutcome::TableAbsent {
                table: "unknown".to_string()
            }
        );
    }

    async fn test_fetch_all(store: &dyn TableStore) {
        let records = store.fetch_all("reclamations").await.unwrap();
        assert_eq!(records.num_rows(), 2);

        let numero = records
            .column("numero")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(numero.values().to_vec(), vec![1, 0]);

        let montant = records
            .column("montant")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(montant.values().to_vec(), vec![12.5, 0.0]);

        assert_eq!(
            records.text_values("libelle").unwrap(),
            vec![Some("Première".to_string()), Some("Deuxième".to_string())]
        );

        let urgent = records
            .column("urgent")
            .unwrap()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!(urgent.value(0));
        assert!(!urgent.value(1));

        let dates = records
            .column("date_d_envoi")
            .unwrap()
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert_eq!(dates.value_as_date(0), NaiveDate::from_ymd_opt(2023, 12, 31));
        assert!(dates.is_null(1));

        let preview = store.preview("reclamations", 1).await.unwrap();
        assert_eq!(preview.num_rows(), 1);
    }

    pub async fn run_generic_store_tests(store: Arc<dyn TableStore>) {
        test_create_table(store.as_ref()).await;
        test_load_file_is_idempotent(store.as_ref()).await;
        test_fetch_all(store.as_ref()).await;
    }
}
