//! Channel adapter tests over the loopback mesh.

mod common;

use avtrans::channel::{ChannelAdapter, ChannelListener, LoopbackBus};
use avtrans::config::TransportConfig;
use avtrans::error::ChannelError;
use avtrans::event::{AvTransEvent, EventType};
use bytes::Bytes;
use common::{DEV_A, DEV_B, init_tracing, wait_until};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

const SENDER_SESSION: &str = "owner_avtrans.control.sender";
const RECEIVER_SESSION: &str = "owner_avtrans.control.receiver";

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<AvTransEvent>>,
    packets: Mutex<Vec<(Bytes, Bytes)>>,
    unregister_on_close: Mutex<Option<Weak<ChannelAdapter>>>,
}

impl EventLog {
    fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl ChannelListener for EventLog {
    fn on_channel_event(&self, event: &AvTransEvent) {
        self.events.lock().unwrap().push(event.clone());
        if event.event_type == EventType::ChannelClosed {
            let adapter = self.unregister_on_close.lock().unwrap().clone();
            if let Some(adapter) = adapter.and_then(|a| a.upgrade()) {
                adapter.unregister_channel_listener(&event.content, &event.peer_dev_id);
            }
        }
    }

    fn on_stream_received(&self, data: &Bytes, ext: &Bytes) {
        self.packets.lock().unwrap().push((data.clone(), ext.clone()));
    }
}

fn listen(adapter: &ChannelAdapter, session: &str, peer: &str, log: &Arc<EventLog>) {
    let listener: Weak<EventLog> = Arc::downgrade(log);
    adapter
        .register_channel_listener(session, peer, listener)
        .unwrap();
}

struct Pair {
    a: Arc<ChannelAdapter>,
    b: Arc<ChannelAdapter>,
    log_a: Arc<EventLog>,
    log_b: Arc<EventLog>,
}

fn connected_pair(config: &TransportConfig) -> (Arc<LoopbackBus>, Pair) {
    let bus = LoopbackBus::new();
    let pair = Pair {
        a: ChannelAdapter::new(bus.endpoint(DEV_A), config),
        b: ChannelAdapter::new(bus.endpoint(DEV_B), config),
        log_a: Arc::new(EventLog::default()),
        log_b: Arc::new(EventLog::default()),
    };
    pair.b.create_channel_server(RECEIVER_SESSION).unwrap();
    listen(&pair.a, SENDER_SESSION, DEV_B, &pair.log_a);
    listen(&pair.b, RECEIVER_SESSION, DEV_A, &pair.log_b);

    pair.a.create_channel(SENDER_SESSION, DEV_B).unwrap();
    wait_until("both ends open", || {
        pair.log_a.count(EventType::ChannelOpened) == 1
            && pair.log_b.count(EventType::ChannelOpened) == 1
    });
    (bus, pair)
}

#[test]
fn test_bytes_and_streams_reach_listener() {
    init_tracing();
    let (_bus, pair) = connected_pair(&TransportConfig::default());
    assert!(pair.a.is_connected(SENDER_SESSION, DEV_B));

    pair.a
        .send_bytes_data(SENDER_SESSION, DEV_B, b"{\"type\":1}")
        .unwrap();
    pair.a
        .send_stream_data(SENDER_SESSION, DEV_B, b"frame", b"{}")
        .unwrap();
    wait_until("delivery", || {
        pair.log_b.count(EventType::DataReceived) == 1
            && pair.log_b.packets.lock().unwrap().len() == 1
    });

    let events = pair.log_b.events.lock().unwrap();
    let received = events
        .iter()
        .find(|e| e.event_type == EventType::DataReceived)
        .unwrap();
    assert_eq!(received.content, "{\"type\":1}");
    assert_eq!(received.peer_dev_id, DEV_A);
    assert_eq!(pair.log_b.packets.lock().unwrap()[0].0, Bytes::from_static(b"frame"));
}

#[test]
fn test_never_delivers_after_unregister() {
    init_tracing();
    let (_bus, pair) = connected_pair(&TransportConfig::default());

    pair.b.unregister_channel_listener(RECEIVER_SESSION, DEV_A);
    let before = pair.log_b.events.lock().unwrap().len();
    for _ in 0..20 {
        pair.a
            .send_bytes_data(SENDER_SESSION, DEV_B, b"late")
            .unwrap();
    }
    pair.a.close_channel(SENDER_SESSION, DEV_B);
    wait_until("sender close", || pair.log_a.count(EventType::ChannelClosed) == 1);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(pair.log_b.events.lock().unwrap().len(), before);
}

#[test]
fn test_unregister_from_dispatch_thread() {
    init_tracing();
    let (_bus, pair) = connected_pair(&TransportConfig::default());
    *pair.log_b.unregister_on_close.lock().unwrap() = Some(Arc::downgrade(&pair.b));

    pair.a.close_channel(SENDER_SESSION, DEV_B);
    wait_until("receiver close", || pair.log_b.count(EventType::ChannelClosed) == 1);
    wait_until("listener removed", || !pair.b.has_listener(RECEIVER_SESSION, DEV_A));
    wait_until("sender disconnected", || !pair.a.is_connected(SENDER_SESSION, DEV_B));
}

#[test]
fn test_listener_registration_rules() {
    let bus = LoopbackBus::new();
    let adapter = ChannelAdapter::new(bus.endpoint(DEV_A), &TransportConfig::default());
    let log = Arc::new(EventLog::default());
    let listener: Weak<EventLog> = Arc::downgrade(&log);

    assert_eq!(
        adapter.register_channel_listener("", DEV_B, listener.clone()),
        Err(ChannelError::InvalidKey)
    );
    adapter
        .register_channel_listener(SENDER_SESSION, DEV_B, listener.clone())
        .unwrap();
    assert_eq!(
        adapter.register_channel_listener(SENDER_SESSION, DEV_B, listener),
        Err(ChannelError::ListenerExists(SENDER_SESSION.to_string()))
    );

    drop(log);
    assert!(!adapter.has_listener(SENDER_SESSION, DEV_B));
    let replacement = Arc::new(EventLog::default());
    listen(&adapter, SENDER_SESSION, DEV_B, &replacement);
    assert!(adapter.has_listener(SENDER_SESSION, DEV_B));
}

#[test]
fn test_send_limits() {
    init_tracing();
    let config = TransportConfig {
        max_message_len: 16,
        ..TransportConfig::default()
    };
    let (_bus, pair) = connected_pair(&config);

    assert_eq!(
        pair.a.send_bytes_data(SENDER_SESSION, DEV_B, &[b'x'; 32]),
        Err(ChannelError::PayloadTooLarge(32))
    );
    assert_eq!(
        pair.a.send_bytes_data("missing", DEV_B, b"x"),
        Err(ChannelError::SessionNotFound("missing".to_string()))
    );
    assert_eq!(
        pair.a.create_channel(SENDER_SESSION, ""),
        Err(ChannelError::InvalidKey)
    );
}
