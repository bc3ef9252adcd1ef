use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

use csvload::{
    config::{context, schema::load_config, schema::CsvloadConfig},
    logging::build_dispatch,
    orchestrator::Loader,
};

const DEFAULT_CONFIG_PATH: &str = "csvload.toml";
const CLI_DATE_FORMAT: &str = "%Y_%m_%d";

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create tables from the schema scripts and load the input files (default)
    Load,
    /// Write the configured tables to the output directory
    Export {
        /// Date stamped on the file names, as YYYY_MM_DD (defaults to today)
        #[clap(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Run the configured build tool
    Build,
    /// Stage tables from the [import] source database into the input directory
    Import,
    /// Load, build, then export
    Run {
        #[clap(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, CLI_DATE_FORMAT)
        .map_err(|e| format!("expected a date like 2024_01_31 ({e})"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading the configuration from {:?}: {e}", args.config);
            return ExitCode::FAILURE;
        }
    };

    let dispatch = match build_dispatch(&config.logging) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            eprintln!("Error opening the log sink: {e}");
            return ExitCode::FAILURE;
        }
    };

    run(config, args.command.unwrap_or(Command::Load), dispatch.clone())
        .with_subscriber(dispatch)
        .await
}

async fn run(
    config: CsvloadConfig,
    command: Command,
    dispatch: tracing::Dispatch,
) -> ExitCode {
    let store = match context::build_store(&config.catalog).await {
        Ok(store) => store,
        Err(e) => {
            error!("Could not connect to the catalog: {e}");
            return ExitCode::FAILURE;
        }
    };

    let loader = Loader::new(
        store,
        context::build_pipeline(&config),
        config.directories.clone(),
        dispatch,
    );
    let today = || chrono::Local::now().date_naive();

    let mut code = ExitCode::SUCCESS;
    match command {
        Command::Load => {
            loader.load().await;
        }
        Command::Export { date } => {
            loader
                .export(
                    &config.export.tables,
                    date.unwrap_or_else(today),
                    &config.export.date_format,
                )
                .await;
        }
        Command::Build => build(&loader, &config).await,
        Command::Import => code = import(&loader, &config).await,
        Command::Run { date } => {
            loader.load().await;
            build(&loader, &config).await;
            loader
                .export(
                    &config.export.tables,
                    date.unwrap_or_else(today),
                    &config.export.date_format,
                )
                .await;
        }
    }

    loader.close().await;
    info!("Done");
    code
}

async fn build(loader: &Loader, config: &CsvloadConfig) {
    match context::build_tool(config) {
        Some(tool) => {
            loader.build(&tool).await;
        }
        None => warn!("No [build] section configured, nothing to build"),
    }
}

async fn import(loader: &Loader, config: &CsvloadConfig) -> ExitCode {
    let Some(import) = &config.import else {
        warn!("No [import] section configured, nothing to import");
        return ExitCode::SUCCESS;
    };

    let source = match context::build_store(&import.source).await {
        Ok(source) => source,
        Err(e) => {
            error!("Could not connect to the import source: {e}");
            return ExitCode::FAILURE;
        }
    };

    loader
        .import(
            source.as_ref(),
            &import.tables,
            &config.coercion.date_format,
        )
        .await;
    source.close().await;
    ExitCode::SUCCESS
}
