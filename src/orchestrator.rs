//! Runs a whole load: schema scripts first, then every input file, then a row
//! count check. Each file is handled on its own, so one bad file never stops the
//! rest of the run.
//!
//! Everything a [`Loader`] does is logged through the [`Dispatch`] it was built
//! with, including events emitted deep inside the stores and the pipeline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Dispatch, Instrument};

use crate::build_tool::{BuildOutcome, BuildTool};
use crate::config::schema::Directories;
use crate::export::{export_tables, import_tables, ExportReport};
use crate::ingest::{reader::display_name, CsvPipeline};
use crate::store::{table_name_for, LoadOutcome, SchemaScript, TableStore};

/// What happened to every script and input file of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scripts_created: usize,
    pub scripts_failed: usize,
    pub inserted: usize,
    pub already_loaded: usize,
    pub table_absent: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &LoadOutcome) {
        match outcome {
            LoadOutcome::Inserted { .. } => self.inserted += 1,
            LoadOutcome::AlreadyLoaded { .. } => self.already_loaded += 1,
            LoadOutcome::TableAbsent { .. } => self.table_absent += 1,
        }
    }

    pub fn files(&self) -> usize {
        self.inserted + self.already_loaded + self.table_absent + self.failed
    }
}

#[derive(Debug, Clone)]
pub struct Loader {
    store: Arc<dyn TableStore>,
    pipeline: CsvPipeline,
    directories: Directories,
    dispatch: Dispatch,
}

impl Loader {
    pub fn new(
        store: Arc<dyn TableStore>,
        pipeline: CsvPipeline,
        directories: Directories,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            store,
            pipeline,
            directories,
            dispatch,
        }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    /// Create tables, load input files and report row counts.
    pub async fn load(&self) -> RunSummary {
        async {
            let span = info_span!("load", backend = %self.store.descriptor("").backend);
            self.load_inner().instrument(span).await
        }
        .with_subscriber(self.dispatch.clone())
        .await
    }

    async fn load_inner(&self) -> RunSummary {
        let mut summary = RunSummary::default();

        self.ensure_directories().await;
        self.create_tables(&mut summary).await;

        let inputs = list_files(&self.directories.input, "csv").await;
        for path in &inputs {
            let span = info_span!("file", file = %display_name(path));
            self.load_one(path, &mut summary).instrument(span).await;
        }

        self.check_row_counts(&inputs).await;

        info!(
            "Run finished: {} file(s) inserted, {} already loaded, {} without a table, {} failed",
            summary.inserted, summary.already_loaded, summary.table_absent, summary.failed
        );
        summary
    }

    async fn ensure_directories(&self) {
        let Directories {
            schema_scripts,
            input,
            output,
        } = &self.directories;
        for dir in [schema_scripts, input, output] {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                error!("Could not create directory {}: {e}", dir.display());
            }
        }
    }

    async fn create_tables(&self, summary: &mut RunSummary) {
        for path in list_files(&self.directories.schema_scripts, "sql").await {
            let result = match SchemaScript::from_path(&path) {
                Ok(script) => self
                    .store
                    .create_table(&script)
                    .await
                    .map(|_| script.table_name),
                Err(e) => Err(e),
            };

            match result {
                Ok(table) => {
                    debug!("Ran {} for table {table}", path.display());
                    summary.scripts_created += 1;
                }
                Err(e) => {
                    error!("Schema script {} failed: {e}", path.display());
                    summary.scripts_failed += 1;
                }
            }
        }
    }

    async fn load_one(&self, path: &Path, summary: &mut RunSummary) {
        match self.store.load_file(path, &self.pipeline).await {
            Ok(outcome) => summary.record(&outcome),
            Err(e) => {
                error!("Failed to load {}: {e}", display_name(path));
                summary.failed += 1;
            }
        }
    }

    async fn check_row_counts(&self, inputs: &[PathBuf]) {
        for path in inputs {
            let Ok(table) = table_name_for(path) else {
                continue;
            };
            let result = match self.store.table_exists(&table).await {
                Ok(true) => self.store.show_row_count(&table).await.map(|_| ()),
                Ok(false) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Could not count the rows of {table}: {e}");
            }
        }
    }

    /// Write the configured tables to the output directory.
    pub async fn export(
        &self,
        tables: &BTreeMap<String, String>,
        date: NaiveDate,
        stamp_format: &str,
    ) -> ExportReport {
        async {
            let span = info_span!("export", %date);
            export_tables(
                self.store.as_ref(),
                tables,
                &self.directories.output,
                date,
                stamp_format,
            )
            .instrument(span)
            .await
        }
        .with_subscriber(self.dispatch.clone())
        .await
    }

    /// Stage tables from another database as input files for the next load.
    pub async fn import(
        &self,
        source: &dyn TableStore,
        tables: &BTreeMap<String, String>,
        value_date_format: &str,
    ) -> ExportReport {
        async {
            let span = info_span!("import");
            if let Err(e) = tokio::fs::create_dir_all(&self.directories.input).await {
                error!(
                    "Could not create directory {}: {e}",
                    self.directories.input.display()
                );
            }
            import_tables(source, tables, &self.directories.input, value_date_format)
                .instrument(span)
                .await
        }
        .with_subscriber(self.dispatch.clone())
        .await
    }

    pub async fn build(&self, tool: &BuildTool) -> BuildOutcome {
        async {
            let span = info_span!("build", target = %tool.target);
            tool.run().instrument(span).await
        }
        .with_subscriber(self.dispatch.clone())
        .await
    }

    pub async fn close(&self) {
        self.store
            .close()
            .with_subscriber(self.dispatch.clone())
            .await
    }
}

/// Files directly inside `dir` with the given extension, sorted by name.
async fn list_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            error!("Could not list {}: {e}", dir.display());
            return vec![];
        }
    };

    let mut files = vec![];
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let matches = path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(extension))
                    .unwrap_or(false);
                if matches && path.is_file() {
                    files.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Could not list {}: {e}", dir.display());
                break;
            }
        }
    }

    files.sort();
    files
}
