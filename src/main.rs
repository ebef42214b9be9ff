use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use textbook_rag::{api, config, logging, processing};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "textbook-rag",
    about = "Serve textbook ingestion and lesson outline generation over HTTP"
)]
struct Cli {
    /// Interface to bind; overrides SERVER_HOST.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind; overrides SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("Failed to load configuration")?;
    logging::init_tracing();

    let service = processing::ProcessingService::new(config)
        .await
        .context("Failed to initialise processing service")?;
    let app = api::create_router(Arc::new(service));

    let host = cli.host.unwrap_or_else(|| config.server_host.clone());
    let port = cli.port.unwrap_or(config.server_port);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| {
            format!("Failed to bind {host}:{port}; is the port already in use? Try --port")
        })?;
    tracing::info!("Listening on http://{}:{}", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
