use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use table_canon::app::normalize_use_case::NormalizeUseCase;
use table_canon::app::validate_use_case::ValidateUseCase;
use table_canon::config::Config;
use table_canon::infra::{
    ChatCompletionsClient, CsvRecordReader, CsvRecordWriter, JsonReportWriter, JsonTableSource,
};
use table_canon::logging;
use table_canon::pipeline::orchestrator::NormalizationOrchestrator;
use table_canon::pipeline::processing::normalize::DefaultNormalizer;
use table_canon::pipeline::request::RequestBuilder;
use table_canon::pipeline::{Pipeline, RunSummary};

#[derive(Parser)]
#[command(name = "table_canon")]
#[command(
    about = "Canonicalize extracted tables into type/article/amount/year records and audit them"
)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./table_canon.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a table export, write the consolidated CSV and the validation report
    Process {
        /// JSON table export from the extraction step
        input: PathBuf,
        /// Consolidated CSV path
        #[arg(long)]
        output: Option<PathBuf>,
        /// Validation report path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Exit with status 2 when any table failed
        #[arg(long)]
        strict: bool,
    },
    /// Re-audit an existing consolidated CSV without calling the generation service
    Validate {
        csv: PathBuf,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let _log_guard = logging::init_logging(&config.output.log_dir);

    let code = match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands, config: Config) -> Result<i32> {
    match command {
        Commands::Process { input, output, report, strict } => {
            let csv_path = output.unwrap_or_else(|| config.output.csv_path.clone());
            let report_path = report.unwrap_or_else(|| config.output.report_path.clone());
            let summary = process(&config, input, csv_path, report_path).await?;
            print_summary(&summary);
            Ok(summary.exit_code(strict))
        }
        Commands::Validate { csv, report } => {
            let report_path = report.unwrap_or_else(|| config.output.report_path.clone());
            let input = CsvRecordReader::new(&csv).read().await?;
            let use_case = ValidateUseCase::with_default_validator(Box::new(
                JsonReportWriter::new(&report_path),
            ));
            let report = use_case.validate(&input).await?;
            println!("{}", report.summary);
            println!("Report: {}", report_path.display());
            Ok(0)
        }
    }
}

async fn process(
    config: &Config,
    input: PathBuf,
    csv_path: PathBuf,
    report_path: PathBuf,
) -> Result<RunSummary> {
    let generator = ChatCompletionsClient::new(&config.generation)
        .context("Generation service unavailable")?;
    let requests = RequestBuilder::from_path(config.generation.prompt_path.as_deref())?;
    let orchestrator = NormalizationOrchestrator::new(
        Arc::new(generator),
        Arc::new(DefaultNormalizer::new()),
        requests,
        config.orchestrator.clone(),
        config.generation.timeout(),
    );

    let pipeline = Pipeline::new(
        Box::new(JsonTableSource::new(input)),
        NormalizeUseCase::new(Arc::new(orchestrator), config.orchestrator.concurrency),
        Box::new(CsvRecordWriter::new(&csv_path)),
        ValidateUseCase::with_default_validator(Box::new(JsonReportWriter::new(&report_path))),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight tables");
            on_interrupt.cancel();
        }
    });

    let summary = pipeline.run(cancel).await?;
    info!("Consolidated CSV: {}", csv_path.display());
    info!("Validation report: {}", report_path.display());
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    println!("Run {}", summary.run_id);
    println!(
        "  Tables: {} ({} succeeded, {} fallback, {} failed)",
        summary.total_tables, summary.succeeded, summary.fallback, summary.failed
    );
    for (table_id, rows) in &summary.rows_per_table {
        println!("    {}: {} rows", table_id, rows);
    }
    println!("  {}", summary.report.summary);
}
