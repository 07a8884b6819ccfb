//! relaymeshd — the relay fabric's server entry point
//!
//! Loads a TOML configuration, gossips with the configured peers, claims a
//! CustomerID range if this instance doesn't have one yet, then serves the
//! full route table until `SIGINT`.

use anyhow::Result;
use clap::Parser;
use relaymesh::config::Config;
use relaymesh::directory::InstanceDirectory;
use relaymesh::domain_types::RequestIdGenerator;
use relaymesh::registry::Registry;
use relaymesh::server::{self, AppState};
use relaymesh::time_provider::production_time_provider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line arguments for `relaymeshd`.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to this instance's TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("relaymesh=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!(server = %config.server, port = %config.port, is_master = config.is_master, "loaded configuration");

    let directory = InstanceDirectory::new(config.clone()).await?;
    directory.bootstrap().await;
    directory.request_range_if_needed().await;

    let state = Arc::new(AppState {
        config: config.clone(),
        registry: Registry::default(),
        directory,
        request_ids: RequestIdGenerator::new(),
        time: production_time_provider(),
    });

    let router = server::build_router(state);
    let (listener, addr) = server::start_server(&config).await?;
    info!(%addr, "relaymeshd listening");

    server::serve_with_graceful_shutdown(listener, router).await?;
    info!("relaymeshd shutting down gracefully");
    Ok(())
}
