//! Lifecycle Listeners
//!
//! Listeners observe connect/disconnect transitions without taking part in
//! protocol logic. Each call is isolated: an error or panic from one listener
//! is logged and the remaining listeners still run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::channel::Channel;
use crate::transport::RawConnection;
use crate::Result;

/// Lifecycle transition being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connect,
    Disconnect,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Connect => f.write_str("connect"),
            LifecycleEvent::Disconnect => f.write_str("disconnect"),
        }
    }
}

/// What a listener gets to see about one transition
pub struct EventContext<'a> {
    pub event: LifecycleEvent,
    pub connection: &'a Arc<dyn RawConnection>,
    /// Absent when the connection was torn down before a channel resolved
    pub channel: Option<&'a Arc<Channel>>,
}

/// Best-effort observer of connection lifecycle transitions
///
/// Notified under the connection's lifecycle lock, with the same re-entry
/// rules as [`ChannelHandler`](super::ChannelHandler).
pub trait LifecycleListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_connect(&self, ctx: &EventContext<'_>) -> Result<()>;

    fn on_disconnect(&self, ctx: &EventContext<'_>) -> Result<()>;
}

/// Immutable, ordered set of listeners fixed at startup
#[derive(Clone)]
pub struct ListenerSet {
    listeners: Arc<[Arc<dyn LifecycleListener>]>,
}

impl Default for ListenerSet {
    fn default() -> Self {
        ListenerSetBuilder::default().build()
    }
}

impl ListenerSet {
    pub fn builder() -> ListenerSetBuilder {
        ListenerSetBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Notify every listener in registration order.
    ///
    /// Returns how many listeners failed.
    pub fn notify(&self, ctx: &EventContext<'_>) -> usize {
        let mut failures = 0;

        for listener in self.listeners.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match ctx.event {
                LifecycleEvent::Connect => listener.on_connect(ctx),
                LifecycleEvent::Disconnect => listener.on_disconnect(ctx),
            }));

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            failures += 1;
            warn!(
                listener = listener.name(),
                event = %ctx.event,
                connection = %ctx.connection.id(),
                "Failed to invoke listener when channel {}: {}",
                ctx.event,
                error
            );
        }

        failures
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|listener| listener.name()))
            .finish()
    }
}

/// Collects listeners before the set is frozen
#[derive(Default)]
pub struct ListenerSetBuilder {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl ListenerSetBuilder {
    pub fn with(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn push(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    pub fn build(self) -> ListenerSet {
        ListenerSet {
            listeners: self.listeners.into(),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
