//! Raw Connection Seam
//!
//! The transport layer hands every accepted socket to the core as a
//! [`RawConnection`]. The core never owns the socket; it only hangs its
//! [`Channel`] off the connection's attachment slot.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::channel::Channel;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one raw connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identity
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Transport-owned handle for one established connection
pub trait RawConnection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    fn remote_addr(&self) -> io::Result<SocketAddr>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Queue bytes for writing without waiting for the socket
    fn send(&self, data: Bytes) -> io::Result<()>;

    /// Ask the transport to tear the connection down
    fn close(&self);

    fn is_active(&self) -> bool;

    /// Per-connection attribute slot holding the channel back-reference
    fn attachment(&self) -> &ChannelAttachment;
}

impl fmt::Display for dyn RawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.local_addr(), self.remote_addr()) {
            (Ok(local), Ok(remote)) => write!(f, "[{}, L:{} - R:{}]", self.id(), local, remote),
            _ => write!(f, "[{}]", self.id()),
        }
    }
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Vacant,
    Bound(Arc<Channel>),
    Detached,
}

/// Attribute slot carried by every raw connection
///
/// Moves `Vacant -> Bound -> Detached`; `Detached` is terminal so a torn-down
/// connection can never be given a second channel.
#[derive(Debug, Default)]
pub struct ChannelAttachment {
    state: Mutex<SlotState>,
    lifecycle: ReentrantMutex<()>,
}

impl ChannelAttachment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current channel, if one is bound
    pub fn get(&self) -> Option<Arc<Channel>> {
        match &*self.state.lock() {
            SlotState::Bound(channel) => Some(Arc::clone(channel)),
            _ => None,
        }
    }

    /// Return the bound channel or bind the one built by `create`.
    ///
    /// `create` runs at most once per slot, under the slot lock. The flag is
    /// `true` when this call performed the bind. Returns `None` once the slot
    /// is detached.
    pub fn get_or_attach_with<F>(&self, create: F) -> Option<(Arc<Channel>, bool)>
    where
        F: FnOnce() -> Arc<Channel>,
    {
        let mut state = self.state.lock();
        match &*state {
            SlotState::Bound(channel) => Some((Arc::clone(channel), false)),
            SlotState::Detached => None,
            SlotState::Vacant => {
                let channel = create();
                *state = SlotState::Bound(Arc::clone(&channel));
                Some((channel, true))
            }
        }
    }

    /// Detach the channel and close the slot for good. Idempotent.
    pub fn detach(&self) -> Option<Arc<Channel>> {
        self.detach_with(|_| {})
    }

    /// Like [`detach`](Self::detach), running `unbind` on the released
    /// channel before the slot lock is dropped.
    pub fn detach_with<F>(&self, unbind: F) -> Option<Arc<Channel>>
    where
        F: FnOnce(&Arc<Channel>),
    {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Detached) {
            SlotState::Bound(channel) => {
                unbind(&channel);
                Some(channel)
            }
            _ => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(&*self.state.lock(), SlotState::Detached)
    }

    /// Serializes the connect and disconnect paths of this one connection.
    ///
    /// Reentrant: a callback running under the lock may drive the same
    /// connection again on its own thread. Another thread doing so waits.
    pub fn lock_lifecycle(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lifecycle.lock()
    }
}
