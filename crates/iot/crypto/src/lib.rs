//! IoT Crypto
//!
//! Payload signing for webhook delivery and shared access signatures for
//! hub registries.

mod sas;
mod signature;

pub use sas::*;
pub use signature::*;
