use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use arrow_csv::WriterBuilder;
use chrono::NaiveDate;
use tracing::{error, info};

use crate::records::RecordSet;
use crate::store::{Error, Result, TableStore};

const UTF8_BOM: &[u8] = "\u{feff}".as_bytes();
pub const OUTPUT_DELIMITER: u8 = b';';
pub const EXPORT_VALUE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Files written and tables that couldn't be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<String>,
}

/// Write records as `;`-separated UTF-8 with a byte-order mark and a header row.
pub fn write_csv(records: &RecordSet, path: &Path, date_format: &str) -> Result<()> {
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = BufWriter::new(File::create(path).map_err(io_error)?);
    file.write_all(UTF8_BOM).map_err(io_error)?;

    let mut writer = WriterBuilder::new()
        .with_header(true)
        .with_delimiter(OUTPUT_DELIMITER)
        .with_date_format(date_format.to_string())
        .build(file);
    writer.write(records.batch())?;

    writer.into_inner().flush().map_err(io_error)?;
    Ok(())
}

async fn write_tables(
    store: &dyn TableStore,
    tables: &BTreeMap<String, String>,
    file_name: impl Fn(&str) -> String,
    dir: &Path,
    date_format: &str,
) -> ExportReport {
    let mut report = ExportReport::default();

    for (table, label) in tables {
        let path = dir.join(file_name(label));
        let result = match store.fetch_all(table).await {
            Ok(records) => write_csv(&records, &path, date_format).map(|_| records.num_rows()),
            Err(e) => Err(e),
        };

        match result {
            Ok(rows) => {
                info!("Wrote {rows} row(s) of {table} to {}", path.display());
                report.written.push(path);
            }
            Err(e) => {
                error!("Could not write {table} to {}: {e}", path.display());
                report.failed.push(table.clone());
            }
        }
    }

    report
}

/// Write each table to `<label>_<stamp>.csv` in the output directory.
pub async fn export_tables(
    store: &dyn TableStore,
    tables: &BTreeMap<String, String>,
    dir: &Path,
    date: NaiveDate,
    stamp_format: &str,
) -> ExportReport {
    let stamp = date.format(stamp_format).to_string();
    write_tables(
        store,
        tables,
        |label| format!("{label}_{stamp}.csv"),
        dir,
        EXPORT_VALUE_DATE_FORMAT,
    )
    .await
}

/// Copy tables from another database into the input directory as `<label>.csv`,
/// ready for the next load. Dates are written the way the loader reads them.
pub async fn import_tables(
    source: &dyn TableStore,
    tables: &BTreeMap<String, String>,
    input_dir: &Path,
    value_date_format: &str,
) -> ExportReport {
    write_tables(
        source,
        tables,
        |label| format!("{label}.csv"),
        input_dir,
        value_date_format,
    )
    .await
}
