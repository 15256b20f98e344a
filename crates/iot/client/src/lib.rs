//! IoT Clients
//!
//! Outbound collaborators: external device registries, the device
//! authentication service, the configuration workflow service and webhook
//! receivers.

mod devauth;
mod error;
mod iotcore;
mod iothub;
mod ip_filter;
mod webhook;
mod workflows;

pub use devauth::*;
pub use error::*;
pub use iotcore::*;
pub use iothub::*;
pub use ip_filter::*;
pub use webhook::*;
pub use workflows::*;
