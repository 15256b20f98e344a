//! IoT Core Types
//!
//! Device, integration and event model shared by the storage, client and
//! service layers, plus the typed errors callers match on.

mod connection_string;
mod device;
mod error;
mod event;
mod hostname;
mod identity;
mod integration;

pub use connection_string::*;
pub use device::*;
pub use error::*;
pub use event::*;
pub use hostname::*;
pub use identity::*;
pub use integration::*;
