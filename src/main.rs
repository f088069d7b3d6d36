//! Ventabot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ventabot")]
#[command(about = "Conversational commerce core: coalescing, claiming, and the agent turn loop")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if let Some(config_path) = cli.config {
        ventabot::config::Config::load_from_path(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        ventabot::config::Config::load().context("failed to load configuration")?
    };

    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let pool = ventabot::db::connect(&config.sqlite_path())
        .await
        .context("failed to open database")?;

    let adapter = Arc::new(ventabot::messaging::HttpGatewayAdapter::new(
        config.gateway.base_url.clone(),
        config.gateway.internal_secret.clone(),
    ));
    let directory = Arc::new(ventabot::service::HttpTenantDirectory::new(
        config.gateway.base_url.clone(),
        config.gateway.internal_secret.clone(),
    ));

    let service = Arc::new(
        ventabot::service::ChatService::build(&config, pool, adapter, directory)
            .await
            .context("failed to build chat service")?,
    );

    let sweep = service.start_sweep();
    tracing::info!("buffer sweep started");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = ventabot::api::start_http_server(config.http_bind, service.clone(), shutdown_rx)
        .await
        .context("failed to start HTTP server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    service.shutdown().await;
    sweep.abort();
    let _ = server.await;

    tracing::info!("ventabot stopped");
    Ok(())
}
