//! Channel Registry Implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::Channel;
use crate::bridge::ChannelHandler;
use crate::config::Config;
use crate::transport::{ConnectionId, RawConnection};

/// At-most-once mapping from raw connection to channel
///
/// The authoritative binding lives in each connection's attachment slot; the
/// map here mirrors it so live channels can be enumerated and counted.
pub struct ChannelRegistry {
    channels: DashMap<ConnectionId, Arc<Channel>>,
    total_created: AtomicU64,
    total_removed: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            total_created: AtomicU64::new(0),
            total_removed: AtomicU64::new(0),
        }
    }

    /// Return the channel bound to `connection`, creating it on first use.
    ///
    /// Returns `None` when the connection has already been torn down.
    pub fn get_or_create(
        &self,
        connection: &Arc<dyn RawConnection>,
        config: &Arc<Config>,
        handler: &Arc<dyn ChannelHandler>,
    ) -> Option<Arc<Channel>> {
        // The map entry is written under the slot lock so a racing `remove`
        // always sees it.
        let (channel, created) = connection.attachment().get_or_attach_with(|| {
            let channel = Arc::new(Channel::new(connection, Arc::clone(config), Arc::clone(handler)));
            self.channels.insert(channel.id(), Arc::clone(&channel));
            channel
        })?;

        if created {
            self.total_created.fetch_add(1, Ordering::Relaxed);
            debug!("Created {} for connection {}", channel, connection.id());
        }

        Some(channel)
    }

    /// Detach the channel from `connection`. Removing twice is a no-op.
    pub fn remove(&self, connection: &Arc<dyn RawConnection>) -> Option<Arc<Channel>> {
        let channel = connection.attachment().detach_with(|channel| {
            if self.channels.remove(&channel.id()).is_some() {
                self.total_removed.fetch_add(1, Ordering::Relaxed);
            }
        })?;
        channel.mark_inactive();

        debug!("Removed {} after {:?}", channel, channel.age());
        Some(channel)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Channel>> {
        self.channels.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Snapshot of all live channels
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_channels: self.channels.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_channels: usize,
    pub total_created: u64,
    pub total_removed: u64,
}
