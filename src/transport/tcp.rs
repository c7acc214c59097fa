//! TCP Transport Implementation
//!
//! Accepts TCP connections and drives the lifecycle bridge: one
//! `connection_established` per accepted socket, inbound bytes to the
//! handler, and exactly one `connection_closed` when the socket goes away.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, instrument, warn};

use super::{ChannelAttachment, ConnectionId, RawConnection};
use crate::bridge::LifecycleBridge;
use crate::Result;

/// Close flag shared by a connection and its reader and writer
#[derive(Debug, Default)]
struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

/// Raw connection over a tokio TCP stream
///
/// Writes go through an unbounded queue drained by a writer task, so `send`
/// never waits on the socket.
pub struct TcpConnection {
    id: ConnectionId,
    remote: SocketAddr,
    local: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    signal: Arc<CloseSignal>,
    attachment: ChannelAttachment,
}

impl TcpConnection {
    /// Wrap `stream`, spawning its writer task. The read half is returned to
    /// the caller, which owns the read loop.
    pub fn spawn(stream: TcpStream) -> io::Result<(Arc<Self>, OwnedReadHalf)> {
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let signal = Arc::new(CloseSignal::default());
        let id = ConnectionId::next();

        tokio::spawn(write_loop(id, write_half, queue, Arc::clone(&signal)));

        let connection = Arc::new(Self {
            id,
            remote,
            local,
            outbound,
            signal,
            attachment: ChannelAttachment::new(),
        });

        Ok((connection, read_half))
    }

    /// Resolves once the connection has been closed locally
    pub async fn closed(&self) {
        self.signal.wait().await
    }
}

async fn write_loop(
    id: ConnectionId,
    mut write_half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    signal: Arc<CloseSignal>,
) {
    loop {
        tokio::select! {
            biased;
            data = queue.recv() => match data {
                Some(data) => {
                    if let Err(e) = write_half.write_all(&data).await {
                        debug!("Write to {} failed: {}", id, e);
                        signal.close();
                        break;
                    }
                }
                None => break,
            },
            _ = signal.wait() => break,
        }
    }

    if let Err(e) = write_half.shutdown().await {
        debug!("Shutdown of {} write half failed: {}", id, e);
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.signal.is_closed())
            .finish()
    }
}

impl RawConnection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.remote)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn send(&self, data: Bytes) -> io::Result<()> {
        if self.signal.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"));
        }
        self.outbound
            .send(data)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped"))
    }

    fn close(&self) {
        if self.signal.close() {
            debug!("Closing connection {}", self.id);
        }
    }

    fn is_active(&self) -> bool {
        !self.signal.is_closed()
    }

    fn attachment(&self) -> &ChannelAttachment {
        &self.attachment
    }
}

/// Accepts TCP connections and feeds them to a [`LifecycleBridge`]
pub struct TcpTransport {
    listener: TcpListener,
    bridge: Arc<LifecycleBridge>,
    active_connections: Arc<AtomicUsize>,
}

impl TcpTransport {
    /// Bind to the address configured on the bridge
    pub async fn bind(bridge: Arc<LifecycleBridge>) -> Result<Self> {
        let bind_addr = bridge.config().transport.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;

        info!("Successfully bound to {} ({})", listener.local_addr()?, bridge.config().url());

        Ok(Self {
            listener,
            bridge,
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn bridge(&self) -> &Arc<LifecycleBridge> {
        &self.bridge
    }

    /// Number of sockets currently being served
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Accept loop; returns once `shutdown` fires
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let mut shutdown_rx = shutdown.subscribe();
        let max_connections = self.bridge.config().transport.max_connections;

        info!("Starting connection acceptance loop");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);

                            if self.active_connections() >= max_connections {
                                warn!("Connection limit {} reached, rejecting connection from {}",
                                      max_connections, addr);
                                continue;
                            }

                            let slot = ActiveSlot::acquire(&self.active_connections);
                            let bridge = Arc::clone(&self.bridge);
                            let shutdown_rx = shutdown.subscribe();

                            tokio::spawn(async move {
                                let _slot = slot;
                                if let Err(e) = serve_connection(stream, bridge, shutdown_rx).await {
                                    error!("Error serving connection from {}: {:#}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }
}

#[instrument(skip_all, fields(peer = ?stream.peer_addr().ok()))]
async fn serve_connection(
    stream: TcpStream,
    bridge: Arc<LifecycleBridge>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let (connection, mut read_half) = TcpConnection::spawn(stream)?;
    let raw: Arc<dyn RawConnection> = connection.clone();
    let handler = Arc::clone(bridge.handler());
    let serving = ServeGuard {
        bridge: Arc::clone(&bridge),
        connection: Arc::clone(&raw),
    };

    if let Err(e) = bridge.connection_established(&raw) {
        error!("Connection {} rejected on connect: {:#}", raw.id(), e);
        if let Some(channel) = bridge.channel_of(&raw) {
            handler.caught(&channel, &e);
        }
        connection.close();
    }

    let buffer_size = bridge.config().transport.buffer_size;
    let mut buffer = BytesMut::with_capacity(buffer_size);

    while !connection.signal.is_closed() {
        buffer.reserve(buffer_size);

        tokio::select! {
            read = read_half.read_buf(&mut buffer) => match read {
                Ok(0) => {
                    debug!("Peer closed connection {}", raw.id());
                    break;
                }
                Ok(_) => {
                    let data = buffer.split().freeze();
                    if let Some(channel) = bridge.channel_of(&raw) {
                        if let Err(e) = handler.received(&channel, data) {
                            handler.caught(&channel, &e);
                        }
                    }
                }
                Err(e) => {
                    debug!("Read from {} failed: {}", raw.id(), e);
                    if let Some(channel) = bridge.channel_of(&raw) {
                        handler.caught(&channel, &anyhow::Error::new(e));
                    }
                    break;
                }
            },
            _ = connection.closed() => break,
            _ = shutdown_rx.recv() => {
                debug!("Connection {} received shutdown signal", raw.id());
                break;
            }
        }
    }

    drop(serving);
    Ok(())
}

/// Counts one served socket until dropped
struct ActiveSlot(Arc<AtomicUsize>);

impl ActiveSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Delivers the close event and closes the socket when the serving task ends,
/// including when a handler panics.
struct ServeGuard {
    bridge: Arc<LifecycleBridge>,
    connection: Arc<dyn RawConnection>,
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("Serving task for {} panicked, closing connection", self.connection.id());
        }
        self.bridge.connection_closed(&self.connection);
        self.connection.close();
    }
}
