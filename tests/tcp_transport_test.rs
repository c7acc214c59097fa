//! TCP transport tests over loopback sockets

use std::sync::Arc;
use std::time::Duration;

use rustchannel::bridge::{LifecycleBridge, ListenerSet};
use rustchannel::testing::{RecordingHandler, RecordingListener};
use rustchannel::{AddressIndex, ChannelRegistry, Config, ShutdownCoordinator, TcpTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

struct Harness {
    transport: Arc<TcpTransport>,
    shutdown: ShutdownCoordinator,
    server: tokio::task::JoinHandle<()>,
}

async fn start(handler: Arc<RecordingHandler>, listeners: ListenerSet) -> Harness {
    let mut config = Config::default();
    config.transport.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.transport.max_connections = 4;

    let bridge = Arc::new(LifecycleBridge::new(
        Arc::new(ChannelRegistry::new()),
        Arc::new(AddressIndex::new()),
        Arc::new(config),
        handler,
        listeners,
    ));

    let transport = Arc::new(TcpTransport::bind(bridge).await.unwrap());
    let shutdown = ShutdownCoordinator::new(Duration::from_secs(2));

    let server = {
        let transport = Arc::clone(&transport);
        let sender = shutdown.sender();
        tokio::spawn(async move {
            transport.run(sender).await.unwrap();
        })
    };

    Harness {
        transport,
        shutdown,
        server,
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_connect_and_disconnect_over_tcp() {
    let handler = Arc::new(RecordingHandler::new());
    let listener = Arc::new(RecordingListener::new("observer"));
    let harness = start(
        handler.clone(),
        ListenerSet::builder().with(listener.clone()).build(),
    )
    .await;
    let bridge = Arc::clone(harness.transport.bridge());

    let client = TcpStream::connect(harness.transport.local_addr().unwrap()).await.unwrap();
    let client_addr = client.local_addr().unwrap();
    let key = format!("{}:{}", client_addr.ip(), client_addr.port());

    eventually(|| bridge.addresses().contains(&key)).await;
    assert_eq!(handler.connected_channels().len(), 1);
    assert_eq!(listener.connects(), 1);

    let channel = bridge.addresses().get(&key).unwrap();
    assert!(channel.is_connected());
    assert_eq!(channel.remote_address_key(), key);

    drop(client);

    eventually(|| handler.disconnected_count() == 1).await;
    eventually(|| listener.disconnects() == 1).await;
    assert!(!bridge.addresses().contains(&key));
    assert!(bridge.registry().is_empty());
    assert!(!channel.is_connected());
    assert!(channel.send(bytes::Bytes::from_static(b"late")).is_err());

    harness.shutdown.trigger();
    harness.server.await.unwrap();
}

#[tokio::test]
async fn test_received_bytes_reach_handler_and_channel_writes_back() {
    let handler = Arc::new(RecordingHandler::new());
    let harness = start(handler.clone(), ListenerSet::empty()).await;
    let bridge = Arc::clone(harness.transport.bridge());

    let mut client = TcpStream::connect(harness.transport.local_addr().unwrap()).await.unwrap();
    client.write_all(b"ping").await.unwrap();

    eventually(|| handler.received().concat() == b"ping").await;

    let channel = handler.connected_channels()[0].clone();
    channel.send(bytes::Bytes::from_static(b"pong")).unwrap();

    let mut reply = [0u8; 4];
    timeout(Duration::from_secs(5), client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"pong");

    channel.close();
    eventually(|| handler.disconnected_count() == 1).await;
    assert!(bridge.registry().is_empty());

    let mut rest = Vec::new();
    let read = timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);

    harness.shutdown.trigger();
    harness.server.await.unwrap();
}

#[tokio::test]
async fn test_handler_rejection_closes_socket() {
    let handler = Arc::new(RecordingHandler::failing_on_connect());
    let harness = start(handler.clone(), ListenerSet::empty()).await;

    let mut client = TcpStream::connect(harness.transport.local_addr().unwrap()).await.unwrap();

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(read, 0);

    eventually(|| handler.disconnected_count() == 1).await;
    assert_eq!(handler.caught_count(), 1);
    assert!(harness.transport.bridge().registry().is_empty());
    assert!(harness.transport.bridge().addresses().is_empty());

    harness.shutdown.trigger();
    harness.server.await.unwrap();
}

#[tokio::test]
async fn test_handler_panic_on_connect_still_releases_connection() {
    let handler = Arc::new(RecordingHandler::panicking_on_connect());
    let listener = Arc::new(RecordingListener::new("observer"));
    let harness = start(
        handler.clone(),
        ListenerSet::builder().with(listener.clone()).build(),
    )
    .await;
    let bridge = Arc::clone(harness.transport.bridge());

    let mut client = TcpStream::connect(harness.transport.local_addr().unwrap()).await.unwrap();

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(read, 0);
    drop(client);

    eventually(|| harness.transport.active_connections() == 0).await;
    assert_eq!(handler.connected_channels().len(), 1);
    assert_eq!(handler.disconnected_count(), 1);
    assert_eq!(listener.disconnects(), 1);
    assert!(bridge.registry().is_empty());
    assert!(bridge.addresses().is_empty());

    harness.shutdown.trigger();
    harness.server.await.unwrap();
    assert!(harness.shutdown.wait_for_connections(&harness.transport).await);
}

#[tokio::test]
async fn test_shutdown_drains_open_connections() {
    let handler = Arc::new(RecordingHandler::new());
    let harness = start(handler.clone(), ListenerSet::empty()).await;
    let addr = harness.transport.local_addr().unwrap();

    let _first = TcpStream::connect(addr).await.unwrap();
    let _second = TcpStream::connect(addr).await.unwrap();
    eventually(|| handler.connected_channels().len() == 2).await;
    assert_eq!(harness.transport.active_connections(), 2);

    harness.shutdown.trigger();
    harness.server.await.unwrap();

    assert!(harness.shutdown.wait_for_connections(&harness.transport).await);
    assert_eq!(handler.disconnected_count(), 2);
    assert_eq!(harness.transport.active_connections(), 0);
}
