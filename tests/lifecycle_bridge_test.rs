//! Lifecycle bridge scenarios driven through in-memory connections

use std::sync::Arc;
use std::thread;

use rustchannel::bridge::{LifecycleBridge, ListenerSet};
use rustchannel::testing::{FakeConnection, RecordingHandler, RecordingListener};
use rustchannel::{AddressIndex, ChannelRegistry, Config, RawConnection};

fn bridge(handler: Arc<RecordingHandler>, listeners: ListenerSet) -> LifecycleBridge {
    LifecycleBridge::new(
        Arc::new(ChannelRegistry::new()),
        Arc::new(AddressIndex::new()),
        Arc::new(Config::default()),
        handler,
        listeners,
    )
}

#[test]
fn test_connect_registers_channel_under_remote_address() {
    let handler = Arc::new(RecordingHandler::new());
    let bridge = bridge(handler.clone(), ListenerSet::empty());
    let conn = FakeConnection::shared("10.0.0.1:9000");

    bridge.connection_established(&conn).unwrap();

    let channel = bridge.addresses().get("10.0.0.1:9000").expect("address indexed");
    assert_eq!(channel.id(), conn.id());
    assert_eq!(channel.remote_address_key(), "10.0.0.1:9000");
    assert_eq!(channel.local_address_key(), "127.0.0.1:20880");
    assert_eq!(channel.url(), "tcp://127.0.0.1:20880");

    let connected = handler.connected_channels();
    assert_eq!(connected.len(), 1);
    assert!(Arc::ptr_eq(&connected[0], &channel));
    assert!(Arc::ptr_eq(&bridge.registry().get(conn.id()).unwrap(), &channel));
}

#[test]
fn test_duplicate_connect_reuses_channel() {
    let handler = Arc::new(RecordingHandler::new());
    let bridge = bridge(handler.clone(), ListenerSet::empty());
    let conn = FakeConnection::shared("10.0.0.1:9000");

    bridge.connection_established(&conn).unwrap();
    bridge.connection_established(&conn).unwrap();

    let connected = handler.connected_channels();
    assert_eq!(connected.len(), 2);
    assert!(Arc::ptr_eq(&connected[0], &connected[1]));
    assert_eq!(bridge.registry().len(), 1);
    assert_eq!(bridge.registry().stats().total_created, 1);
    assert_eq!(bridge.addresses().len(), 1);
}

#[test]
fn test_connect_then_disconnect_clears_everything() {
    let handler = Arc::new(RecordingHandler::new());
    let listener = Arc::new(RecordingListener::new("observer"));
    let bridge = bridge(
        handler.clone(),
        ListenerSet::builder().with(listener.clone()).build(),
    );
    let conn = FakeConnection::shared("10.0.0.1:9000");

    bridge.connection_established(&conn).unwrap();
    let channel = bridge.channel_of(&conn).unwrap();
    bridge.connection_closed(&conn);

    assert!(!bridge.addresses().contains("10.0.0.1:9000"));
    assert!(bridge.registry().get(conn.id()).is_none());
    assert!(bridge.channel_of(&conn).is_none());
    assert!(!channel.is_connected());

    let disconnected = handler.disconnected_channels();
    assert_eq!(disconnected.len(), 1);
    assert!(Arc::ptr_eq(&disconnected[0], &channel));

    assert_eq!(listener.connects(), 1);
    assert_eq!(listener.disconnects(), 1);
    assert!(listener.saw_channel_on_disconnect());
}

#[test]
fn test_failing_listener_does_not_reach_transport() {
    let handler = Arc::new(RecordingHandler::new());
    let first = Arc::new(RecordingListener::failing("l1"));
    let second = Arc::new(RecordingListener::new("l2"));
    let bridge = bridge(
        handler.clone(),
        ListenerSet::builder().with(first.clone()).with(second.clone()).build(),
    );
    let conn = FakeConnection::shared("10.0.0.1:9000");

    assert!(bridge.connection_established(&conn).is_ok());
    assert_eq!(first.connects(), 1);
    assert_eq!(second.connects(), 1);

    bridge.connection_closed(&conn);
    assert_eq!(first.disconnects(), 1);
    assert_eq!(second.disconnects(), 1);
    assert!(bridge.addresses().is_empty());
    assert!(bridge.registry().is_empty());
}

#[test]
fn test_panicking_listener_does_not_block_cleanup() {
    let handler = Arc::new(RecordingHandler::new());
    let panicking = Arc::new(RecordingListener::panicking("boom"));
    let after = Arc::new(RecordingListener::new("after"));
    let bridge = bridge(
        handler.clone(),
        ListenerSet::builder().with(panicking.clone()).with(after.clone()).build(),
    );
    let conn = FakeConnection::shared("10.0.0.7:9000");

    bridge.connection_established(&conn).unwrap();
    bridge.connection_closed(&conn);

    assert_eq!(after.connects(), 1);
    assert_eq!(after.disconnects(), 1);
    assert_eq!(handler.disconnected_count(), 1);
    assert!(bridge.addresses().is_empty());
    assert!(bridge.registry().is_empty());
}

#[test]
fn test_handler_error_on_connect_propagates() {
    let handler = Arc::new(RecordingHandler::failing_on_connect());
    let listener = Arc::new(RecordingListener::new("observer"));
    let bridge = bridge(
        handler.clone(),
        ListenerSet::builder().with(listener.clone()).build(),
    );
    let conn = FakeConnection::shared("10.0.0.1:9000");

    let err = bridge.connection_established(&conn).unwrap_err();
    assert!(err.to_string().contains("connected rejected"));

    // Steps before the handler already ran; listeners did not.
    assert!(bridge.addresses().contains("10.0.0.1:9000"));
    assert_eq!(listener.connects(), 0);

    bridge.connection_closed(&conn);
    assert!(bridge.addresses().is_empty());
    assert!(bridge.registry().is_empty());
    assert_eq!(listener.disconnects(), 1);
}

#[test]
fn test_handler_failure_on_disconnect_still_cleans_up() {
    for handler in [
        RecordingHandler::failing_on_disconnect(),
        RecordingHandler::panicking_on_disconnect(),
    ] {
        let handler = Arc::new(handler);
        let listener = Arc::new(RecordingListener::new("observer"));
        let bridge = bridge(
            handler.clone(),
            ListenerSet::builder().with(listener.clone()).build(),
        );
        let conn = FakeConnection::shared("10.0.0.3:9000");

        bridge.connection_established(&conn).unwrap();
        bridge.connection_closed(&conn);

        assert_eq!(handler.disconnected_count(), 1);
        assert!(bridge.addresses().is_empty());
        assert!(bridge.registry().is_empty());
        assert!(conn.attachment().is_detached());
        assert_eq!(listener.disconnects(), 1);
    }
}

#[test]
fn test_disconnect_without_connect_resolves_fresh_channel() {
    let handler = Arc::new(RecordingHandler::new());
    let listener = Arc::new(RecordingListener::new("observer"));
    let bridge = bridge(
        handler.clone(),
        ListenerSet::builder().with(listener.clone()).build(),
    );
    let conn = FakeConnection::shared("10.0.0.4:9000");

    bridge.connection_closed(&conn);

    assert!(handler.connected_channels().is_empty());
    assert_eq!(handler.disconnected_count(), 1);
    assert_eq!(listener.disconnects(), 1);
    assert!(listener.saw_channel_on_disconnect());
    assert!(bridge.registry().is_empty());
    assert_eq!(bridge.registry().stats().total_created, 1);
}

#[test]
fn test_disconnect_removes_address_even_without_channel() {
    let handler = Arc::new(RecordingHandler::new());
    let bridge = bridge(handler.clone(), ListenerSet::empty());
    let first = FakeConnection::shared("10.0.0.5:9000");
    let stale = FakeConnection::shared("10.0.0.5:9000");

    bridge.connection_established(&first).unwrap();
    bridge.registry().remove(&stale);
    bridge.connection_closed(&stale);

    assert!(!bridge.addresses().contains("10.0.0.5:9000"));
    assert_eq!(handler.disconnected_count(), 0);
}

#[test]
fn test_reconnect_under_same_address_overwrites() {
    let handler = Arc::new(RecordingHandler::new());
    let bridge = bridge(handler.clone(), ListenerSet::empty());
    let old = FakeConnection::shared("10.0.0.6:9000");
    let new = FakeConnection::shared("10.0.0.6:9000");

    bridge.connection_established(&old).unwrap();
    bridge.connection_established(&new).unwrap();

    assert_eq!(bridge.addresses().len(), 1);
    let indexed = bridge.addresses().get("10.0.0.6:9000").unwrap();
    assert_eq!(indexed.id(), new.id());
    assert_eq!(bridge.registry().len(), 2);
}

#[test]
fn test_connect_with_unresolvable_address_is_an_error() {
    let handler = Arc::new(RecordingHandler::new());
    let bridge = bridge(handler.clone(), ListenerSet::empty());
    let conn = FakeConnection::without_addresses();

    assert!(bridge.connection_established(&conn).is_err());
    assert!(handler.connected_channels().is_empty());

    bridge.connection_closed(&conn);
    assert_eq!(handler.disconnected_count(), 1);
    assert_eq!(handler.disconnected_channels()[0].remote_address_key(), "unresolved");
    assert!(bridge.registry().is_empty());
}

#[test]
fn test_concurrent_connections_are_independent() {
    let handler = Arc::new(RecordingHandler::new());
    let bridge = Arc::new(bridge(handler.clone(), ListenerSet::empty()));

    let workers: Vec<_> = (0..8u16)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let conn = FakeConnection::shared(&format!("10.0.1.{}:{}", i, 9000 + i));
                bridge.connection_established(&conn).unwrap();
                bridge.connection_established(&conn).unwrap();
                bridge.connection_closed(&conn);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let stats = bridge.registry().stats();
    assert_eq!(stats.total_created, 8);
    assert_eq!(stats.total_removed, 8);
    assert_eq!(stats.active_channels, 0);
    assert!(bridge.addresses().is_empty());
    assert_eq!(handler.connected_channels().len(), 16);
    assert_eq!(handler.disconnected_count(), 8);
}
