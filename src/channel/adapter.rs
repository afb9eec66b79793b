//! Session bookkeeping and listener dispatch on top of a [`ChannelTransport`].

use super::transport::{ChannelTransport, SessionId, SessionInfo, TransportEventSink};
use crate::config::TransportConfig;
use crate::error::ChannelError;
use crate::event::{AvTransEvent, EventType};
use crate::observability::span_channel;
use crate::util::anonymize;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, ThreadId};

/// Receiver of channel events and stream packets for one session and peer.
pub trait ChannelListener: Send + Sync {
    /// Session lifecycle events and inbound control messages.
    fn on_channel_event(&self, event: &AvTransEvent);

    /// Inbound stream packet with its side-channel metadata.
    fn on_stream_received(&self, data: &Bytes, ext: &Bytes);
}

type ListenerKey = (String, String);

/// Routes transport callbacks to listeners keyed by (session name, peer).
///
/// One adapter is created per transport at the composition root and shared
/// by every engine and plugin. Listener handles are weak: the adapter never
/// keeps a listener alive.
///
/// Guarantees:
/// - callbacks for a session reach its listener in transport order;
/// - once [`ChannelAdapter::unregister_channel_listener`] returns, that
///   listener receives nothing more.
pub struct ChannelAdapter {
    transport: Arc<dyn ChannelTransport>,
    package_name: String,
    max_message_len: usize,
    suffix_pairs: Vec<(String, String)>,
    servers: Mutex<HashSet<String>>,
    listeners: Mutex<HashMap<ListenerKey, Weak<dyn ChannelListener>>>,
    sessions: Mutex<HashMap<SessionId, SessionInfo>>,
    in_flight: Mutex<Vec<(ListenerKey, ThreadId)>>,
    dispatch_done: Condvar,
}

impl ChannelAdapter {
    /// Create an adapter and install it as the transport's event sink.
    pub fn new(transport: Arc<dyn ChannelTransport>, config: &TransportConfig) -> Arc<Self> {
        let control = &config.control_session_suffix;
        let adapter = Arc::new(Self {
            transport: Arc::clone(&transport),
            package_name: config.package_name.clone(),
            max_message_len: config.max_message_len,
            suffix_pairs: vec![
                (
                    config.sender_data_session_suffix.clone(),
                    config.receiver_data_session_suffix.clone(),
                ),
                (format!("{control}.sender"), format!("{control}.receiver")),
            ],
            servers: Mutex::new(HashSet::new()),
            listeners: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(Vec::new()),
            dispatch_done: Condvar::new(),
        });
        let sink = Arc::downgrade(&adapter);
        transport.set_event_sink(sink);
        adapter
    }

    /// Local device id of the underlying transport.
    pub fn local_device_id(&self) -> &str {
        self.transport.local_device_id()
    }

    /// Name of the session the peer serves for our `session_name`: sender
    /// suffixes map to receiver suffixes and back.
    pub fn peer_session_name(&self, session_name: &str) -> String {
        for (sender, receiver) in &self.suffix_pairs {
            if let Some(stem) = session_name.strip_suffix(sender.as_str()) {
                return format!("{stem}{receiver}");
            }
            if let Some(stem) = session_name.strip_suffix(receiver.as_str()) {
                return format!("{stem}{sender}");
            }
        }
        session_name.to_string()
    }

    /// Accept inbound sessions named `session_name`. Idempotent.
    pub fn create_channel_server(&self, session_name: &str) -> Result<(), ChannelError> {
        if session_name.is_empty() {
            return Err(ChannelError::InvalidKey);
        }
        let mut servers = self.servers.lock().unwrap();
        if servers.contains(session_name) {
            return Ok(());
        }
        self.transport
            .create_server(&self.package_name, session_name)?;
        servers.insert(session_name.to_string());
        tracing::debug!(session = %session_name, "channel server created");
        Ok(())
    }

    /// Stop serving `session_name`.
    pub fn remove_channel_server(&self, session_name: &str) -> Result<(), ChannelError> {
        if !self.servers.lock().unwrap().remove(session_name) {
            return Err(ChannelError::ServerNotFound(session_name.to_string()));
        }
        self.transport
            .remove_server(&self.package_name, session_name)
    }

    /// Register `listener` for events on (`session_name`, `peer_dev_id`).
    pub fn register_channel_listener(
        &self,
        session_name: &str,
        peer_dev_id: &str,
        listener: Weak<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        if session_name.is_empty() || peer_dev_id.is_empty() {
            return Err(ChannelError::InvalidKey);
        }
        let key = (session_name.to_string(), peer_dev_id.to_string());
        let mut listeners = self.listeners.lock().unwrap();
        if listeners.get(&key).is_some_and(|l| l.strong_count() > 0) {
            return Err(ChannelError::ListenerExists(session_name.to_string()));
        }
        listeners.insert(key, listener);
        tracing::debug!(session = %session_name, peer = %anonymize(peer_dev_id), "listener registered");
        Ok(())
    }

    /// Remove the listener for (`session_name`, `peer_dev_id`) and wait until
    /// no dispatch to it is in progress on another thread.
    pub fn unregister_channel_listener(&self, session_name: &str, peer_dev_id: &str) {
        let key = (session_name.to_string(), peer_dev_id.to_string());
        if self.listeners.lock().unwrap().remove(&key).is_none() {
            return;
        }
        let me = thread::current().id();
        let in_flight = self.in_flight.lock().unwrap();
        let _guard = self
            .dispatch_done
            .wait_while(in_flight, |busy| {
                busy.iter().any(|(k, thread)| *k == key && *thread != me)
            })
            .unwrap();
        tracing::debug!(session = %session_name, peer = %anonymize(peer_dev_id), "listener unregistered");
    }

    /// Whether a live listener is registered for the key.
    pub fn has_listener(&self, session_name: &str, peer_dev_id: &str) -> bool {
        let key = (session_name.to_string(), peer_dev_id.to_string());
        self.listeners
            .lock()
            .unwrap()
            .get(&key)
            .is_some_and(|l| l.strong_count() > 0)
    }

    /// Start opening a session from `session_name` to the peer's counterpart
    /// session. The outcome arrives as a channel event.
    pub fn create_channel(&self, session_name: &str, peer_dev_id: &str) -> Result<SessionId, ChannelError> {
        if session_name.is_empty() || peer_dev_id.is_empty() {
            return Err(ChannelError::InvalidKey);
        }
        let peer_session = self.peer_session_name(session_name);
        let session_id = self
            .transport
            .open_session(session_name, &peer_session, peer_dev_id)?;
        tracing::info!(
            session = %session_name,
            peer_session = %peer_session,
            peer = %anonymize(peer_dev_id),
            session_id,
            "opening channel"
        );
        Ok(session_id)
    }

    /// Close every open session matching the key.
    pub fn close_channel(&self, session_name: &str, peer_dev_id: &str) {
        for session_id in self.session_ids(session_name, peer_dev_id) {
            self.transport.close_session(session_id);
        }
    }

    /// Whether a session matching the key is open.
    pub fn is_connected(&self, session_name: &str, peer_dev_id: &str) -> bool {
        !self.session_ids(session_name, peer_dev_id).is_empty()
    }

    /// Send a control message.
    pub fn send_bytes_data(
        &self,
        session_name: &str,
        peer_dev_id: &str,
        data: &[u8],
    ) -> Result<(), ChannelError> {
        if data.len() > self.max_message_len {
            return Err(ChannelError::PayloadTooLarge(data.len()));
        }
        let session_id = self.session_id(session_name, peer_dev_id)?;
        self.transport.send_bytes(session_id, data)
    }

    /// Send a media packet with side-channel metadata.
    pub fn send_stream_data(
        &self,
        session_name: &str,
        peer_dev_id: &str,
        data: &[u8],
        ext: &[u8],
    ) -> Result<(), ChannelError> {
        let session_id = self.session_id(session_name, peer_dev_id)?;
        self.transport.send_stream(session_id, data, ext)
    }

    fn session_id(&self, session_name: &str, peer_dev_id: &str) -> Result<SessionId, ChannelError> {
        self.session_ids(session_name, peer_dev_id)
            .into_iter()
            .next()
            .ok_or_else(|| ChannelError::SessionNotFound(session_name.to_string()))
    }

    fn session_ids(&self, session_name: &str, peer_dev_id: &str) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, info)| info.session_name == session_name && info.peer_dev_id == peer_dev_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn dispatch(&self, info: &SessionInfo, deliver: impl FnOnce(&dyn ChannelListener)) {
        let key = (info.session_name.clone(), info.peer_dev_id.clone());
        let listener = {
            let listeners = self.listeners.lock().unwrap();
            let Some(listener) = listeners.get(&key).and_then(Weak::upgrade) else {
                tracing::debug!(session = %info.session_name, "no listener, event dropped");
                return;
            };
            self.in_flight
                .lock()
                .unwrap()
                .push((key.clone(), thread::current().id()));
            listener
        };

        {
            let _span = span_channel(&info.session_name, &info.peer_dev_id).entered();
            deliver(listener.as_ref());
        }
        drop(listener);

        let me = thread::current().id();
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(pos) = in_flight.iter().position(|(k, t)| *k == key && *t == me) {
            in_flight.swap_remove(pos);
        }
        drop(in_flight);
        self.dispatch_done.notify_all();
    }

    fn session_info(&self, session_id: SessionId) -> Option<SessionInfo> {
        self.sessions.lock().unwrap().get(&session_id).cloned()
    }
}

impl TransportEventSink for ChannelAdapter {
    fn on_session_opened(
        &self,
        session_id: SessionId,
        info: SessionInfo,
        result: Result<(), ChannelError>,
    ) {
        let event_type = match &result {
            Ok(()) => {
                self.sessions
                    .lock()
                    .unwrap()
                    .insert(session_id, info.clone());
                EventType::ChannelOpened
            }
            Err(err) => {
                tracing::warn!(session = %info.session_name, error = %err, "channel open failed");
                EventType::ChannelOpenFail
            }
        };
        let event = AvTransEvent::new(event_type, info.session_name.clone(), info.peer_dev_id.clone());
        self.dispatch(&info, |listener| listener.on_channel_event(&event));
    }

    fn on_session_closed(&self, session_id: SessionId) {
        let Some(info) = self.sessions.lock().unwrap().remove(&session_id) else {
            return;
        };
        tracing::info!(session = %info.session_name, peer = %anonymize(&info.peer_dev_id), "channel closed");
        let event = AvTransEvent::new(
            EventType::ChannelClosed,
            info.session_name.clone(),
            info.peer_dev_id.clone(),
        );
        self.dispatch(&info, |listener| listener.on_channel_event(&event));
    }

    fn on_bytes_received(&self, session_id: SessionId, data: Bytes) {
        let Some(info) = self.session_info(session_id) else {
            tracing::debug!(session_id, "bytes for unknown session dropped");
            return;
        };
        let event = AvTransEvent::new(
            EventType::DataReceived,
            String::from_utf8_lossy(&data).into_owned(),
            info.peer_dev_id.clone(),
        );
        self.dispatch(&info, |listener| listener.on_channel_event(&event));
    }

    fn on_stream_received(&self, session_id: SessionId, data: Bytes, ext: Bytes) {
        let Some(info) = self.session_info(session_id) else {
            tracing::debug!(session_id, "stream for unknown session dropped");
            return;
        };
        self.dispatch(&info, |listener| listener.on_stream_received(&data, &ext));
    }
}

impl std::fmt::Debug for ChannelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelAdapter")
            .field("device", &anonymize(self.transport.local_device_id()))
            .field("sessions", &self.sessions.lock().unwrap().len())
            .field("listeners", &self.listeners.lock().unwrap().len())
            .finish()
    }
}
