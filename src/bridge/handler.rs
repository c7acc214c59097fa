//! Protocol Handler Capability

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::channel::Channel;
use crate::Result;

/// Higher-level protocol handler notified of every channel's lifecycle
///
/// An error from `connected` reaches the transport; errors from the other
/// callbacks are logged and absorbed by their caller.
///
/// `connected` and `disconnected` run while the connection's lifecycle lock
/// is held. They may call back into the bridge for the same connection on
/// the calling thread, but must not wait on another thread that does.
pub trait ChannelHandler: Send + Sync {
    fn connected(&self, channel: &Arc<Channel>) -> Result<()>;

    fn disconnected(&self, channel: &Arc<Channel>) -> Result<()>;

    /// Inbound bytes read from the channel's connection
    fn received(&self, _channel: &Arc<Channel>, _data: Bytes) -> Result<()> {
        Ok(())
    }

    /// Transport-level failure on the channel
    fn caught(&self, channel: &Arc<Channel>, error: &anyhow::Error) {
        warn!("Unhandled error on {}: {:#}", channel, error);
    }
}
