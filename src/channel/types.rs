//! Channel Types

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::address::to_address_string;
use crate::bridge::ChannelHandler;
use crate::config::Config;
use crate::transport::{ConnectionId, RawConnection};
use crate::Result;

const UNRESOLVED_ADDRESS: &str = "unresolved";

/// Stable logical representation of one raw connection's lifetime
pub struct Channel {
    id: ConnectionId,
    connection: Weak<dyn RawConnection>,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    remote_address_key: String,
    local_address_key: String,
    config: Arc<Config>,
    handler: Arc<dyn ChannelHandler>,
    created_at: Instant,
    active: AtomicBool,
    attributes: RwLock<HashMap<String, String>>,
}

impl Channel {
    /// Bind a new channel to `connection`.
    ///
    /// Addresses are resolved once here; a connection that cannot report an
    /// address yields an `unresolved` key rather than failing.
    pub fn new(
        connection: &Arc<dyn RawConnection>,
        config: Arc<Config>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Self {
        let remote_addr = connection.remote_addr().ok();
        let local_addr = connection.local_addr().ok();

        Self {
            id: connection.id(),
            connection: Arc::downgrade(connection),
            remote_addr,
            local_addr,
            remote_address_key: address_key(remote_addr),
            local_address_key: address_key(local_addr),
            config,
            handler,
            created_at: Instant::now(),
            active: AtomicBool::new(true),
            attributes: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_address_key(&self) -> &str {
        &self.remote_address_key
    }

    pub fn local_address_key(&self) -> &str {
        &self.local_address_key
    }

    /// Configuration in effect when the channel was created
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn url(&self) -> String {
        self.config.url()
    }

    pub fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.handler
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// The underlying connection, while the transport still holds it
    pub fn connection(&self) -> Option<Arc<dyn RawConnection>> {
        self.connection.upgrade()
    }

    /// True until the channel is removed from the registry and its
    /// connection is still up
    pub fn is_connected(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self.connection().is_some_and(|conn| conn.is_active())
    }

    pub(crate) fn mark_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Queue bytes on the underlying connection
    pub fn send(&self, data: Bytes) -> Result<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(anyhow!("Channel {} is closed", self.id));
        }

        let connection = self
            .connection()
            .ok_or_else(|| anyhow!("Connection {} is gone", self.id))?;
        connection.send(data)?;
        Ok(())
    }

    /// Close the underlying connection; the transport reports the close
    pub fn close(&self) {
        if let Some(connection) = self.connection() {
            connection.close();
        }
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.read().get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.write().insert(key.into(), value.into());
    }

    pub fn remove_attribute(&self, key: &str) -> Option<String> {
        self.attributes.write().remove(key)
    }
}

fn address_key(addr: Option<SocketAddr>) -> String {
    addr.as_ref()
        .map(to_address_string)
        .unwrap_or_else(|| UNRESOLVED_ADDRESS.to_string())
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("remote", &self.remote_address_key)
            .field("local", &self.local_address_key)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Channel [{}, {} -> {}]",
            self.id, self.local_address_key, self.remote_address_key
        )
    }
}
