use std::path::PathBuf;

use clap::Parser;
use tollgate::{AppState, build_router, config::GateConfig, jobs};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "tollgate",
    version,
    about = "Credit metering and idempotent billing gateway"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "tollgate.toml")]
    config: PathBuf,

    /// Override the configured listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = if cli.config.exists() {
        GateConfig::from_file(&cli.config)?
    } else {
        tracing::warn!(
            path = %cli.config.display(),
            "config file not found, starting with defaults"
        );
        GateConfig::default()
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let host = config.server.host;
    let port = config.server.port;
    let state = AppState::new(config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = jobs::spawn_reservation_sweeper(
        state.db.clone(),
        state.config.jobs.clone(),
        shutdown_rx,
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(%host, port, "tollgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
