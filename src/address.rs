//! Address Index
//!
//! Secondary lookup from a peer's remote address string to its channel, used
//! by outbound routing code that only knows where a peer lives.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::channel::Channel;
use crate::transport::RawConnection;

/// Render an address as `host:port` using the bare host address
pub fn to_address_string(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Address key of a connection's remote end
///
/// A connection that cannot report its peer address is a lookup failure.
pub fn remote_address_string(connection: &dyn RawConnection) -> io::Result<String> {
    connection.remote_addr().map(|addr| to_address_string(&addr))
}

/// Remote address -> channel, at most one entry per address
pub struct AddressIndex {
    channels: DashMap<String, Arc<Channel>>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Insert, replacing whatever channel was registered for `address`
    pub fn insert(&self, address: String, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        self.channels.insert(address, channel)
    }

    pub fn remove(&self, address: &str) -> Option<Arc<Channel>> {
        self.channels.remove(address).map(|(_, channel)| channel)
    }

    pub fn get(&self, address: &str) -> Option<Arc<Channel>> {
        self.channels.get(address).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.channels.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for AddressIndex {
    fn default() -> Self {
        Self::new()
    }
}
