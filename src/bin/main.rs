use clap::{Parser, ValueEnum};
use financial_document_analyzer::{
    config::AppConfig,
    document::DocumentSource,
    jobs::JobRunner,
    pipeline::Pipeline,
    report::render_text,
    tools::create_default_registry,
    ReportStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

/// Analyze a financial PDF from the command line.
#[derive(Debug, Parser)]
#[command(name = "analyzer", version)]
struct Cli {
    /// PDF to analyze
    #[arg(required_unless_present = "sample", conflicts_with = "sample")]
    path: Option<PathBuf>,

    /// Analyze the bundled sample document instead
    #[arg(long)]
    sample: bool,

    /// Question to answer about the document
    #[arg(short, long)]
    query: Option<String>,

    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env();
    let registry = create_default_registry(&config.tools)?;
    let pipeline = Arc::new(Pipeline::new(Arc::new(registry), config.pipeline.clone()));
    let runner = JobRunner::new(pipeline, DocumentSource::new(config.documents.clone()));

    let stored = match &cli.path {
        Some(path) => runner.documents().load_path(path, false).await?,
        None => runner.documents().load_sample().await?,
    };

    info!(filename = %stored.document().filename, "Analyzing document");

    let response = runner
        .run_sync(stored, cli.query.as_deref(), CancellationToken::new())
        .await;

    match (cli.format, &response.report) {
        (OutputFormat::Text, Some(report)) => println!("{}", render_text(report)),
        _ => println!("{}", serde_json::to_string_pretty(&response)?),
    }

    if let Some(error) = &response.error {
        eprintln!("Analysis failed ({}): {}", error.kind, error.message);
    }

    Ok(match response.status {
        ReportStatus::Error => ExitCode::FAILURE,
        ReportStatus::Success | ReportStatus::Partial => ExitCode::SUCCESS,
    })
}
