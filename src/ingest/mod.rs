use std::path::{Path, PathBuf};

use arrow_schema::ArrowError;
use tracing::info;

use crate::data_types::TableSchema;
use crate::records::RecordSet;

pub mod coerce;
pub mod normalize;
pub mod reader;
pub mod reconcile;

use coerce::{CoercionWarning, TypeCoercer};
use normalize::HeaderCollision;
use reader::{display_name, DelimitedReader};
use reconcile::SchemaMismatch;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unable to parse {path:?} with any known delimiter ({})", .attempts.join("; "))]
    Parse {
        path: PathBuf,
        attempts: Vec<String>,
    },

    #[error("Failed reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed assembling records for {path:?}: {source}")]
    Arrow {
        path: PathBuf,
        #[source]
        source: ArrowError,
    },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// A file that went through every preparation stage and is ready for insertion,
/// along with everything that was adjusted on the way.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub records: RecordSet,
    pub collisions: Vec<HeaderCollision>,
    pub mismatch: SchemaMismatch,
    pub coercion_warnings: Vec<CoercionWarning>,
}

/// read → normalize headers → reconcile with the destination → coerce.
#[derive(Debug, Clone, Default)]
pub struct CsvPipeline {
    reader: DelimitedReader,
    coercer: TypeCoercer,
}

impl CsvPipeline {
    pub fn new(reader: DelimitedReader, coercer: TypeCoercer) -> Self {
        Self { reader, coercer }
    }

    pub fn reader(&self) -> &DelimitedReader {
        &self.reader
    }

    pub fn run(&self, path: &Path, schema: &TableSchema) -> Result<PreparedFile> {
        let file_name = display_name(path);

        let raw = self.reader.read(path)?;
        let normalized = normalize::normalize_columns(&file_name, &raw)?;
        let reconciled = reconcile::reconcile(&file_name, &normalized.records, schema)?;
        let coerced = self.coercer.coerce(&reconciled.records, schema)?;

        info!(
            "Prepared {} row(s) from {file_name} for {}",
            coerced.records.num_rows(),
            schema.table
        );

        Ok(PreparedFile {
            records: coerced.records,
            collisions: normalized.collisions,
            mismatch: reconciled.mismatch,
            coercion_warnings: coerced.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arrow::array::{Array, BooleanArray, Int64Array};
    use tempfile::NamedTempFile;

    use super::*;
    use crate::data_types::ColumnSchema;

    #[test]
    fn test_pipeline_end_to_end() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "\u{feff}Numéro;Libellé;Urgent;Commentaire\n1;Première;oui;x\n;Deuxième;non;y\n"
        )
        .unwrap();

        let schema = TableSchema {
            table: "reclamations".to_string(),
            columns: vec![
                ColumnSchema::from_declared("numero", "INTEGER"),
                ColumnSchema::from_declared("libelle", "VARCHAR(4)"),
                ColumnSchema::from_declared("urgent", "BOOLEAN"),
                ColumnSchema::from_declared("date_envoi", "DATE"),
            ],
        };

        let prepared = CsvPipeline::default().run(file.path(), &schema).unwrap();
        let records = &prepared.records;

        assert_eq!(
            records.column_names(),
            vec!["numero", "libelle", "urgent", "date_envoi"]
        );
        let numero = records
            .column("numero")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(numero.values().to_vec(), vec![1, 0]);
        assert_eq!(
            records.text_values("libelle").unwrap(),
            vec![Some("Prem".to_string()), Some("Deux".to_string())]
        );

        // "oui"/"non" are not in the default lexicon
        let urgent = records
            .column("urgent")
            .unwrap()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!(!urgent.value(0) && !urgent.value(1));
        assert_eq!(prepared.coercion_warnings.len(), 1);

        assert_eq!(prepared.mismatch.missing, vec!["date_envoi".to_string()]);
        assert_eq!(prepared.mismatch.extra, vec!["commentaire".to_string()]);
        assert_eq!(records.column("date_envoi").unwrap().null_count(), 2);
    }
}
