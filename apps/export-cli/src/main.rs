//! Ansel export command-line entry point.
//!
//! Usage: `ansel-export [--config <PATH>] <IMAGE>...`

mod app;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ansel-export");

    let args = config::Args::parse();
    let config = config::Config::load(args.config.as_deref())?;
    tracing::info!(endpoint = %config.session.endpoint, files = args.files.len(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, args.files))?;

    tracing::info!("export finished");
    Ok(())
}
