//! IoT Manager - maintenance commands for the lifecycle engine.
//!
//! This binary carries no persistent store; deployments embedding the
//! service pass their own store to [`Cli::run`].

use clap::Parser;
use iot_service::Cli;
use iot_storage::MemoryStore;

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    cli.run(MemoryStore::new()).await
}
