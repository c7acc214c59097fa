//! In-memory fakes for exercising the channel layer without sockets
//!
//! Built for the crate's own tests, and for downstream crates with the
//! `testing` feature enabled, to drive a
//! [`LifecycleBridge`](crate::bridge::LifecycleBridge) directly.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::bridge::{ChannelHandler, EventContext, LifecycleListener};
use crate::channel::Channel;
use crate::transport::{ChannelAttachment, ConnectionId, RawConnection};
use crate::Result;

/// Raw connection backed by nothing but memory
#[derive(Debug)]
pub struct FakeConnection {
    id: ConnectionId,
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    closed: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
    attachment: ChannelAttachment,
}

impl FakeConnection {
    /// Connection from `remote` to `127.0.0.1:20880`
    ///
    /// Panics if `remote` is not a socket address.
    pub fn new(remote: &str) -> Self {
        let remote = remote
            .parse()
            .unwrap_or_else(|_| panic!("invalid fake remote address: {}", remote));
        Self::with_addresses(Some(remote), Some(SocketAddr::from(([127, 0, 0, 1], 20880))))
    }

    pub fn shared(remote: &str) -> Arc<dyn RawConnection> {
        Arc::new(Self::new(remote))
    }

    /// Connection whose address lookups fail
    pub fn without_addresses() -> Arc<dyn RawConnection> {
        Arc::new(Self::with_addresses(None, None))
    }

    fn with_addresses(remote: Option<SocketAddr>, local: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::next(),
            remote,
            local,
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            attachment: ChannelAttachment::new(),
        }
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn address_or_error(addr: Option<SocketAddr>) -> io::Result<SocketAddr> {
    addr.ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "address unavailable"))
}

impl RawConnection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        address_or_error(self.remote)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        address_or_error(self.local)
    }

    fn send(&self, data: Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"));
        }
        self.sent.lock().push(data);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        !self.is_closed()
    }

    fn attachment(&self) -> &ChannelAttachment {
        &self.attachment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Fault {
    #[default]
    None,
    Fail,
    Panic,
}

/// Handler that records every callback it receives
#[derive(Default)]
pub struct RecordingHandler {
    connected: Mutex<Vec<Arc<Channel>>>,
    disconnected: Mutex<Vec<Arc<Channel>>>,
    received: Mutex<Vec<Bytes>>,
    caught: AtomicUsize,
    connect_fault: Fault,
    disconnect_fault: Fault,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_connect() -> Self {
        Self {
            connect_fault: Fault::Fail,
            ..Self::default()
        }
    }

    pub fn panicking_on_connect() -> Self {
        Self {
            connect_fault: Fault::Panic,
            ..Self::default()
        }
    }

    pub fn failing_on_disconnect() -> Self {
        Self {
            disconnect_fault: Fault::Fail,
            ..Self::default()
        }
    }

    pub fn panicking_on_disconnect() -> Self {
        Self {
            disconnect_fault: Fault::Panic,
            ..Self::default()
        }
    }

    pub fn connected_channels(&self) -> Vec<Arc<Channel>> {
        self.connected.lock().clone()
    }

    pub fn disconnected_channels(&self) -> Vec<Arc<Channel>> {
        self.disconnected.lock().clone()
    }

    pub fn disconnected_count(&self) -> usize {
        self.disconnected.lock().len()
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().clone()
    }

    pub fn caught_count(&self) -> usize {
        self.caught.load(Ordering::SeqCst)
    }
}

impl ChannelHandler for RecordingHandler {
    fn connected(&self, channel: &Arc<Channel>) -> Result<()> {
        self.connected.lock().push(Arc::clone(channel));
        match self.connect_fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(anyhow!("connected rejected {}", channel.id())),
            Fault::Panic => panic!("connected panicked for {}", channel.id()),
        }
    }

    fn disconnected(&self, channel: &Arc<Channel>) -> Result<()> {
        self.disconnected.lock().push(Arc::clone(channel));
        match self.disconnect_fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(anyhow!("disconnected rejected {}", channel.id())),
            Fault::Panic => panic!("disconnected panicked for {}", channel.id()),
        }
    }

    fn received(&self, _channel: &Arc<Channel>, data: Bytes) -> Result<()> {
        self.received.lock().push(data);
        Ok(())
    }

    fn caught(&self, _channel: &Arc<Channel>, _error: &anyhow::Error) {
        self.caught.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener that counts its notifications
pub struct RecordingListener {
    name: String,
    fault: Fault,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    channel_on_disconnect: AtomicBool,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingListener {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fault: Fault::None,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            channel_on_disconnect: AtomicBool::new(false),
            journal: None,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fault: Fault::Fail,
            ..Self::new(name)
        }
    }

    pub fn panicking(name: &str) -> Self {
        Self {
            fault: Fault::Panic,
            ..Self::new(name)
        }
    }

    /// Appends `name:event` to a journal shared between listeners
    pub fn with_journal(name: &str, journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(name)
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Whether the last disconnect carried a resolved channel
    pub fn saw_channel_on_disconnect(&self) -> bool {
        self.channel_on_disconnect.load(Ordering::SeqCst)
    }

    fn record(&self, ctx: &EventContext<'_>) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.lock().push(format!("{}:{}", self.name, ctx.event));
        }

        match self.fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(anyhow!("listener {} failed on {}", self.name, ctx.event)),
            Fault::Panic => panic!("listener {} panicked on {}", self.name, ctx.event),
        }
    }
}

impl LifecycleListener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_connect(&self, ctx: &EventContext<'_>) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.record(ctx)
    }

    fn on_disconnect(&self, ctx: &EventContext<'_>) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.channel_on_disconnect
            .store(ctx.channel.is_some(), Ordering::SeqCst);
        self.record(ctx)
    }
}
