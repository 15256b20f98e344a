//! IoT Storage Layer
//!
//! Store contracts for integrations, devices and events, and an in-memory
//! implementation.

mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::*;
