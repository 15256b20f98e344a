//! Command-line maintenance entry points.
//!
//! The commands run against whatever store the caller hands to [`Cli::run`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr as _;
use iot_storage::DataStore;

use crate::{Config, IotManager, SyncPolicy};

/// Largest page the device authentication service returns.
pub const MAX_SYNC_BATCH_SIZE: u16 = 500;

#[derive(Debug, Parser)]
#[command(name = "iot-manager")]
#[command(about = "IoT device lifecycle and reconciliation", long_about = None)]
pub struct Cli {
    /// Configuration file; defaults apply when omitted
    #[arg(long, short, global = true, env = "IOT_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Check that the store and dependent services are reachable
    Check,

    /// Synchronize device state across IoT platforms
    SyncDevices {
        /// Maximum number of devices to sync in a batch [default: from config]
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=MAX_SYNC_BATCH_SIZE as i64))]
        batch_size: Option<u16>,

        /// Do not ignore non-fatal errors
        #[arg(long)]
        fail_early: bool,
    },
}

impl Cli {
    pub fn load_config(&self) -> color_eyre::eyre::Result<Config> {
        match &self.config {
            Some(path) => Config::load(path)
                .wrap_err_with(|| format!("failed to load config from {}", path.display())),
            None => Ok(Config::default()),
        }
    }

    /// Build a manager over `store` with collaborators from the configuration
    /// and run the command.
    pub async fn run<S: DataStore + 'static>(self, store: S) -> color_eyre::eyre::Result<()> {
        let config = self.load_config()?;
        let manager = IotManager::builder(store, config).build()?;
        self.command.run(&manager).await
    }
}

impl Command {
    pub async fn run<S: DataStore + 'static>(
        self,
        manager: &IotManager<S>,
    ) -> color_eyre::eyre::Result<()> {
        match self {
            Command::Check => {
                manager.check_dependencies().await?;
                tracing::info!("store and services reachable");
                Ok(())
            }
            Command::SyncDevices {
                batch_size,
                fail_early,
            } => {
                let batch_size = batch_size
                    .map_or(manager.config().sync_batch_size, usize::from)
                    .clamp(1, usize::from(MAX_SYNC_BATCH_SIZE));
                tracing::info!(batch_size, fail_early, "synchronizing devices");
                manager
                    .sync_devices(batch_size, SyncPolicy::new(fail_early))
                    .await
                    .wrap_err("device synchronization failed")
            }
        }
    }
}
