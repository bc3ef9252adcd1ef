use std::path::Path;

use arrow::array::{Array, BooleanArray, Int64Array, StringArray};
use rstest::rstest;

use csvload::config::context::{build_pipeline, build_store};
use csvload::config::schema::{load_config_from_string, CsvloadConfig};
use csvload::logging::MemoryWriter;
use csvload::orchestrator::{Loader, RunSummary};

const SCHEMA: &str = r#"CREATE TABLE IF NOT EXISTS "signalements" (
    numero BIGINT,
    montant REAL,
    libelle VARCHAR(5),
    cloture BOOLEAN,
    date_de_reception DATE,
    commentaire TEXT
);"#;

fn config(root: &Path) -> CsvloadConfig {
    let root = root.display();
    load_config_from_string(
        &format!(
            r#"
[catalog]
type = "sqlite"
dsn = "sqlite://{root}/catalog.sqlite"

[directories]
schema_scripts = "{root}/schemas"
input = "{root}/input"
output = "{root}/output"
"#
        ),
        false,
    )
    .unwrap()
}

async fn run_once(config: &CsvloadConfig, logs: &MemoryWriter) -> RunSummary {
    let store = build_store(&config.catalog).await.unwrap();
    let loader = Loader::new(
        store,
        build_pipeline(config),
        config.directories.clone(),
        logs.dispatch("info"),
    );
    let summary = loader.load().await;
    loader.close().await;
    summary
}

fn prepare(root: &Path, input: &str) -> CsvloadConfig {
    let config = config(root);
    std::fs::create_dir_all(&config.directories.schema_scripts).unwrap();
    std::fs::create_dir_all(&config.directories.input).unwrap();
    std::fs::write(config.directories.schema_scripts.join("signalements.sql"), SCHEMA).unwrap();
    std::fs::write(config.directories.input.join("signalements.csv"), input).unwrap();
    config
}

#[rstest]
#[case::semicolon("Numéro;Montant;Libellé;Clôturé;Date de réception;Source\n")]
#[case::comma("Numéro,Montant,Libellé,Clôturé,Date de réception,Source\n")]
#[tokio::test]
async fn test_second_run_inserts_nothing(#[case] header: &str) {
    let delimiter = if header.contains(';') { ";" } else { "," };
    let rows = [
        ["12", "3.5", "Abcdefgh", "yes", "15-02-2024", "mail"],
        ["", "nan", "Court", "NO", "pas de date", "tel"],
    ]
    .iter()
    .map(|row| row.join(delimiter) + "\n")
    .collect::<String>();

    let root = tempfile::tempdir().unwrap();
    let config = prepare(root.path(), &format!("\u{feff}{header}{rows}"));

    let first_logs = MemoryWriter::new();
    let first = run_once(&config, &first_logs).await;
    assert_eq!(first.inserted, 1);
    assert_eq!(first.scripts_created, 1);

    let second_logs = MemoryWriter::new();
    let second = run_once(&config, &second_logs).await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_loaded, 1);

    let first_logs = first_logs.contents();
    assert!(first_logs.contains("Missing columns in signalements.csv"));
    assert!(first_logs.contains("Extra columns in signalements.csv"));
    assert!(second_logs.contents().contains("already holds 2 row(s)"));

    let store = build_store(&config.catalog).await.unwrap();
    let records = store.fetch_all("signalements").await.unwrap();
    assert_eq!(records.num_rows(), 2);

    let numero = records
        .column("numero")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(numero.values().to_vec(), vec![12, 0]);

    let libelle = records
        .column("libelle")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(libelle.value(0), "Abcde");
    assert_eq!(libelle.value(1), "Court");

    let cloture = records
        .column("cloture")
        .unwrap()
        .as_any()
        .downcast_ref::<BooleanArray>()
        .unwrap();
    assert!(cloture.value(0));
    assert!(!cloture.value(1));

    let date = records.column("date_de_reception").unwrap();
    assert!(!date.is_null(0));
    assert!(date.is_null(1));
    store.close().await;
}

#[tokio::test]
async fn test_unparsable_file_does_not_stop_the_run() {
    let root = tempfile::tempdir().unwrap();
    let config = prepare(root.path(), "numero;montant\n1;2.5\n");
    std::fs::write(
        config.directories.schema_scripts.join("aaa_first.sql"),
        "CREATE TABLE aaa_first (valeur TEXT, autre TEXT);",
    )
    .unwrap();
    std::fs::write(
        config.directories.input.join("aaa_first.csv"),
        "une seule colonne\nsans séparateur\n",
    )
    .unwrap();

    let logs = MemoryWriter::new();
    let summary = run_once(&config, &logs).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.inserted, 1);

    let logs = logs.contents();
    assert!(logs.contains("Unable to parse"));
    assert!(logs.contains("Table signalements holds 1 row(s)"));
}
