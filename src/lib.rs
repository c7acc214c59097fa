//! RustChannel Library
//!
//! Connection lifecycle registry and event bridge for network transports.
//!
//! Every live peer connection is tracked under a stable [`Channel`]. The
//! [`LifecycleBridge`] turns raw "established" / "closed" events from the
//! transport into handler callbacks and best-effort listener notifications,
//! while keeping the [`ChannelRegistry`] and [`AddressIndex`] consistent.

pub mod address;
pub mod bridge;
pub mod channel;
pub mod config;
pub mod shutdown;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use address::AddressIndex;
pub use bridge::{ChannelHandler, LifecycleBridge, LifecycleListener, ListenerSet};
pub use channel::{Channel, ChannelRegistry};
pub use config::Config;
pub use shutdown::ShutdownCoordinator;
pub use transport::{RawConnection, TcpTransport};

/// Common error type for the channel layer
pub type Result<T> = anyhow::Result<T>;
