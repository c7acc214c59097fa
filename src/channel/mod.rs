//! Channel Module
//!
//! Logical channels and the registry that binds them to raw connections.

pub mod registry;
pub mod types;

pub use registry::{ChannelRegistry, RegistryStats};
pub use types::Channel;
