//! Lifecycle Bridge Implementation
//!
//! Turns the transport's raw "established" / "closed" events into channel
//! lifecycle: registry resolution, address index upkeep, handler callbacks
//! and listener fan-out.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn, Level};

use super::listener::{panic_message, EventContext, LifecycleEvent, ListenerSet};
use super::ChannelHandler;
use crate::address::{remote_address_string, AddressIndex};
use crate::channel::{Channel, ChannelRegistry};
use crate::config::Config;
use crate::transport::RawConnection;
use crate::Result;

/// Bridges transport connection events to the channel layer
pub struct LifecycleBridge {
    registry: Arc<ChannelRegistry>,
    addresses: Arc<AddressIndex>,
    config: Arc<Config>,
    handler: Arc<dyn ChannelHandler>,
    listeners: ListenerSet,
}

impl LifecycleBridge {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        addresses: Arc<AddressIndex>,
        config: Arc<Config>,
        handler: Arc<dyn ChannelHandler>,
        listeners: ListenerSet,
    ) -> Self {
        Self {
            registry,
            addresses,
            config,
            handler,
            listeners,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn addresses(&self) -> &Arc<AddressIndex> {
        &self.addresses
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.handler
    }

    /// Channel already bound to `connection`, without creating one
    pub fn channel_of(&self, connection: &Arc<dyn RawConnection>) -> Option<Arc<Channel>> {
        connection.attachment().get()
    }

    /// Handle a freshly established connection.
    ///
    /// Errors from the protocol handler (and a connection that cannot report
    /// its peer address) are returned to the transport. Listener failures are
    /// logged and absorbed.
    pub fn connection_established(&self, connection: &Arc<dyn RawConnection>) -> Result<()> {
        let _lifecycle = connection.attachment().lock_lifecycle();

        let Some(channel) = self.registry.get_or_create(connection, &self.config, &self.handler)
        else {
            debug!("Connection {} already torn down, skipping connect", connection.id());
            return Ok(());
        };

        let address = remote_address_string(connection.as_ref())
            .with_context(|| format!("Failed to resolve remote address of {}", connection.id()))?;
        self.addresses.insert(address, Arc::clone(&channel));

        self.handler.connected(&channel)?;

        self.listeners.notify(&EventContext {
            event: LifecycleEvent::Connect,
            connection,
            channel: Some(&channel),
        });

        if tracing::enabled!(Level::INFO) {
            info!(
                "The connection {} of {} -> {} is established.",
                connection,
                channel.remote_address_key(),
                channel.local_address_key()
            );
        }

        Ok(())
    }

    /// Handle a closed connection. Never fails.
    ///
    /// Address removal, registry detachment and listener fan-out happen on
    /// every exit path, including a failing or panicking handler.
    pub fn connection_closed(&self, connection: &Arc<dyn RawConnection>) {
        let _lifecycle = connection.attachment().lock_lifecycle();

        let channel = self.registry.get_or_create(connection, &self.config, &self.handler);
        let cleanup = CloseGuard {
            bridge: self,
            connection,
        };

        match remote_address_string(connection.as_ref()) {
            Ok(address) => {
                self.addresses.remove(&address);
            }
            Err(e) => {
                warn!("Failed to resolve remote address of {} on close: {}", connection.id(), e);
            }
        }

        if let Some(channel) = &channel {
            self.notify_disconnected(channel);

            if tracing::enabled!(Level::INFO) {
                info!(
                    "The connection {} of {} -> {} is disconnected.",
                    connection,
                    channel.remote_address_key(),
                    channel.local_address_key()
                );
            }
        } else {
            debug!("No channel resolved for closed connection {}", connection.id());
        }

        drop(cleanup);
    }

    fn notify_disconnected(&self, channel: &Arc<Channel>) {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.handler.disconnected(channel)));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Handler failed on disconnect of {}: {:#}", channel, e);
            }
            Err(payload) => {
                warn!(
                    "Handler panicked on disconnect of {}: {}",
                    channel,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

/// Runs the tail of the close path however the body exits
struct CloseGuard<'a> {
    bridge: &'a LifecycleBridge,
    connection: &'a Arc<dyn RawConnection>,
}

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        let channel = self.bridge.registry.remove(self.connection);

        self.bridge.listeners.notify(&EventContext {
            event: LifecycleEvent::Disconnect,
            connection: self.connection,
            channel: channel.as_ref(),
        });
    }
}
