use std::sync::Arc;

use crate::{
    build_tool::BuildTool,
    ingest::{
        coerce::{BooleanLexicon, TypeCoercer},
        reader::{DelimitedReader, ReaderOptions},
        CsvPipeline,
    },
    store::{interface::TableStore, sqlite::SqliteStore},
};

#[cfg(feature = "catalog-postgres")]
use crate::store::postgres::PostgresStore;

use super::schema;

/// Connect to the configured catalog. This is the only failure that aborts a run.
pub async fn build_store(
    catalog: &schema::Catalog,
) -> Result<Arc<dyn TableStore>, sqlx::Error> {
    let store: Arc<dyn TableStore> = match catalog {
        #[cfg(feature = "catalog-postgres")]
        schema::Catalog::Postgres(schema::Postgres { dsn, schema }) => Arc::new(
            PostgresStore::try_new(dsn.to_string(), schema.to_string()).await?,
        ),
        schema::Catalog::Sqlite(schema::Sqlite { dsn, .. }) => {
            Arc::new(SqliteStore::connect(dsn).await?)
        }
    };
    Ok(store)
}

pub fn build_pipeline(config: &schema::CsvloadConfig) -> CsvPipeline {
    let reader = DelimitedReader::new(ReaderOptions {
        sample_size: config.reader.sample_size,
        lenient_files: config.reader.lenient_files.clone(),
        min_columns: config.reader.min_columns,
    });

    let coercer = TypeCoercer::new(
        config.coercion.numeric_nulls,
        BooleanLexicon::new(&config.coercion.truthy, &config.coercion.falsy),
        config.coercion.date_format.clone(),
    );

    CsvPipeline::new(reader, coercer)
}

pub fn build_tool(config: &schema::CsvloadConfig) -> Option<BuildTool> {
    config.build.as_ref().map(|build| BuildTool {
        command: build.command.clone(),
        project_dir: build.project_dir.clone(),
        profiles_dir: build.profiles_dir.clone(),
        profile: build.profile.clone(),
        target: build.target.clone(),
        select: build.select.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arrow::array::{Array, Int64Array};
    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::schema::load_config_from_string;
    use crate::data_types::{ColumnSchema, TableSchema};

    const CONFIG: &str = r#"
[catalog]
type = "sqlite"
dsn = "sqlite::memory:"
allow_in_memory = true

[coercion]
numeric_nulls = "null"
truthy = ["oui"]
falsy = ["non"]
date_format = "%Y-%m-%d"

[build]
project_dir = "dbt"
profiles_dir = "dbt"
profile = "reclamations"
target = "dev"
"#;

    #[tokio::test]
    async fn test_build_from_config() {
        let config = load_config_from_string(CONFIG, false).unwrap();

        let store = build_store(&config.catalog).await.unwrap();
        assert!(store.list_tables().await.unwrap().is_empty());

        let tool = build_tool(&config).unwrap();
        assert_eq!(tool.command, "dbt");
        assert_eq!(tool.select, None);

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "n;b\n;oui\n3;non\n").unwrap();
        let schema = TableSchema {
            table: "t".to_string(),
            columns: vec![
                ColumnSchema::from_declared("n", "INTEGER"),
                ColumnSchema::from_declared("b", "BOOLEAN"),
            ],
        };

        let prepared = build_pipeline(&config).run(file.path(), &schema).unwrap();
        let n = prepared
            .records
            .column("n")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert!(n.is_null(0));
        assert_eq!(n.value(1), 3);
        assert!(prepared.coercion_warnings.is_empty());
    }
}
