//! Transport Module
//!
//! The raw-connection seam the channel layer sits on, plus a tokio TCP
//! transport that drives it.

pub mod connection;
pub mod tcp;

pub use connection::{ChannelAttachment, ConnectionId, RawConnection};
pub use tcp::{TcpConnection, TcpTransport};
