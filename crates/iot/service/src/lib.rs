//! IoT Service Layer
//!
//! Device lifecycle orchestration across external registries and webhooks,
//! twin/shadow state access, the integration registry and the
//! reconciliation sweep.

mod cli;
mod config;
mod device;
mod integrations;
mod lifecycle;
mod manager;
mod providers;
mod state;
mod sync;
mod task;

#[cfg(test)]
mod testing;

pub use cli::{Cli, Command, MAX_SYNC_BATCH_SIZE};
pub use config::{Config, ConfigError};
pub use lifecycle::{ERR_CONNECT_DEVICE, STATUS_CODE_CONNECT_DEVICE};
pub use manager::{IotManager, IotManagerBuilder};
pub use providers::*;
pub use sync::{INTEGRATION_CACHE_LIMIT, SyncPolicy};
pub use task::{DetachedRunner, InlineRunner, Task, TaskOutcome, TaskRunner, supervise};
