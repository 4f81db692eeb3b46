use financial_document_analyzer::{
    api::{start_server, ApiState},
    config::AppConfig,
    document::DocumentSource,
    jobs::{JobRunner, JobWorker},
    pipeline::Pipeline,
    store::build_store,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();

    info!("Financial Document Analyzer - API Server");
    info!("Port: {}", config.server.port);

    // Create components
    let registry = Arc::new(create_default_registry(&config.tools)?);
    for (kind, name) in registry.list() {
        info!(%kind, name, "Tool registered");
    }

    let pipeline = Arc::new(Pipeline::new(registry, config.pipeline.clone()));
    let analyses = build_store(config.server.database_url.as_deref());
    let runner = JobRunner::new(pipeline, DocumentSource::new(config.documents.clone()))
        .with_analysis_store(analyses.clone())
        .with_retention(config.worker.retention);

    let worker = JobWorker::new(runner.clone(), config.worker.clone()).start();
    info!("Job worker initialized");

    // Start API server
    let served = start_server(ApiState { runner, analyses }, config.server.port).await;

    if let Err(e) = worker.shutdown().await {
        warn!(error = %e, "Job worker already stopped");
    }
    served
}
