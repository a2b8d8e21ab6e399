//! Evaluation Server
//!
//! Main entry point for the evaluation gRPC service.

use std::sync::Arc;

use tonic::transport::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evaluation_core::{EvaluationService, EvaluationStore, MemoryStore};
use evaluation_server::{
    config::DatabaseConfig, proto::evaluation::v1::evaluation_server::EvaluationServer,
    EvaluationGrpcService, GrpcOrchestrator, ServerConfig,
};

/// Default configuration path
const DEFAULT_CONFIG_PATH: &str = "config/evaluation.yaml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evaluation_server=info,evaluation_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting evaluation server");

    // Load configuration
    let config_path =
        std::env::var("EVALUATION_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    tracing::info!(path = %config_path, "Loading configuration");

    let config = ServerConfig::from_file(&config_path)?;

    tracing::info!(
        orchestrator = %config.orchestrator.address,
        in_memory = config.database.in_memory,
        default_interval_minutes = config.service.default_interval_minutes,
        "Configuration loaded"
    );

    let store = open_store(&config.database).await?;

    let orchestrator = Arc::new(GrpcOrchestrator::connect_lazy(
        &config.orchestrator.address,
        config.server.max_message_bytes,
    )?);

    let service = Arc::new(EvaluationService::new(
        store,
        orchestrator,
        config.service.clone(),
    ));

    let addr = std::env::var("EVALUATION_ADDR")
        .unwrap_or_else(|_| config.server.addr.clone())
        .parse()?;

    tracing::info!(%addr, "Starting gRPC server");

    let grpc = EvaluationServer::new(EvaluationGrpcService::new(service.clone()))
        .max_decoding_message_size(config.server.max_message_bytes)
        .max_encoding_message_size(config.server.max_message_bytes);

    Server::builder()
        .add_service(grpc)
        .serve_with_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    service.shutdown().await;
    tracing::info!("Evaluation server stopped");

    Ok(())
}

async fn open_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn EvaluationStore>> {
    if config.in_memory {
        tracing::info!("Using in-memory result store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    open_postgres(config).await
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn EvaluationStore>> {
    let url = config.connection_string()?;
    let store =
        evaluation_core::PgEvaluationStore::connect(&url, config.max_connections).await?;
    store.ensure_schema().await?;
    tracing::info!("Using Postgres result store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &DatabaseConfig) -> anyhow::Result<Arc<dyn EvaluationStore>> {
    anyhow::bail!("database.in_memory is false but the server was built without the postgres feature")
}
