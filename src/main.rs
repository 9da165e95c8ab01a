//! Agora mesh server entry point

use agora::config::AppConfig;
use agora::database::DatabaseConnection;
use agora::server::{MeshRuntime, bind, serve_with_graceful_shutdown};
use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Multi-tenant agent-to-agent mesh runtime
#[derive(Debug, Parser)]
#[command(name = "agora", version, about)]
struct Args {
    /// Address to bind the federation HTTP surface on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// SQLite database file
    #[arg(long, default_value = "agora.db")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("agora=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env();
    info!(domain = %config.federation.domain, "starting agora mesh server");

    let database = DatabaseConnection::connect(&args.database).await?;
    let runtime = MeshRuntime::start(config, database).await?;

    let app = runtime.app();
    let (listener, addr) = bind(args.bind).await?;
    info!(%addr, "federation surface listening");

    let shutdown = CancellationToken::new();
    let serve_token = shutdown.clone();
    let server = tokio::spawn(serve_with_graceful_shutdown(listener, app, serve_token));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();
    server.await??;
    runtime.shutdown().await;

    Ok(())
}
