//! In-process transport connecting endpoints by device id.
//!
//! A [`LoopbackBus`] is a tiny mesh: every [`LoopbackTransport`] obtained
//! from it can open sessions to every other endpoint on the same bus. Each
//! endpoint owns a dispatcher thread fed by a kanal channel, so callbacks
//! reach its sink one at a time and in order, the way a real mesh transport
//! reports them.

use super::transport::{ChannelTransport, SessionId, SessionInfo, TransportEventSink};
use crate::error::ChannelError;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};

enum Delivery {
    Opened {
        session_id: SessionId,
        info: SessionInfo,
        result: Result<(), ChannelError>,
    },
    Closed(SessionId),
    Bytes(SessionId, Bytes),
    Stream(SessionId, Bytes, Bytes),
    Shutdown,
}

/// Where a local session leads.
#[derive(Clone)]
struct Route {
    peer_dev_id: String,
    peer_session_id: SessionId,
}

/// Registry of endpoints sharing one in-process mesh.
#[derive(Default)]
pub struct LoopbackBus {
    endpoints: RwLock<HashMap<String, Weak<LoopbackTransport>>>,
    next_session: AtomicU64,
}

impl LoopbackBus {
    /// Create an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach an endpoint for `device_id`, replacing any stale one.
    pub fn endpoint(self: &Arc<Self>, device_id: impl Into<String>) -> Arc<LoopbackTransport> {
        let device_id = device_id.into();
        let transport = LoopbackTransport::spawn(Arc::downgrade(self), device_id.clone());
        self.endpoints
            .write()
            .unwrap()
            .insert(device_id, Arc::downgrade(&transport));
        transport
    }

    fn lookup(&self, device_id: &str) -> Option<Arc<LoopbackTransport>> {
        self.endpoints
            .read()
            .unwrap()
            .get(device_id)
            .and_then(Weak::upgrade)
    }

    fn session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl std::fmt::Debug for LoopbackBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoints = self.endpoints.read().unwrap();
        f.debug_struct("LoopbackBus")
            .field("endpoints", &endpoints.len())
            .finish()
    }
}

/// One device's view of a [`LoopbackBus`].
pub struct LoopbackTransport {
    device_id: String,
    bus: Weak<LoopbackBus>,
    tx: kanal::Sender<Delivery>,
    sink: Arc<RwLock<Option<Weak<dyn TransportEventSink>>>>,
    servers: Mutex<HashSet<String>>,
    routes: Mutex<HashMap<SessionId, Route>>,
    reject_opens: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackTransport {
    fn spawn(bus: Weak<LoopbackBus>, device_id: String) -> Arc<Self> {
        let (tx, rx) = kanal::unbounded::<Delivery>();
        let sink: Arc<RwLock<Option<Weak<dyn TransportEventSink>>>> = Arc::new(RwLock::new(None));

        let thread_sink = Arc::clone(&sink);
        let handle = thread::Builder::new()
            .name(format!("loopback-{device_id}"))
            .spawn(move || {
                while let Ok(delivery) = rx.recv() {
                    if matches!(delivery, Delivery::Shutdown) {
                        break;
                    }
                    let current = thread_sink.read().unwrap().as_ref().and_then(Weak::upgrade);
                    let Some(sink) = current else {
                        continue;
                    };
                    match delivery {
                        Delivery::Opened {
                            session_id,
                            info,
                            result,
                        } => sink.on_session_opened(session_id, info, result),
                        Delivery::Closed(session_id) => sink.on_session_closed(session_id),
                        Delivery::Bytes(session_id, data) => {
                            sink.on_bytes_received(session_id, data)
                        }
                        Delivery::Stream(session_id, data, ext) => {
                            sink.on_stream_received(session_id, data, ext)
                        }
                        Delivery::Shutdown => break,
                    }
                }
            });

        let dispatcher = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(device = %device_id, error = %err, "failed to spawn loopback dispatcher");
                None
            }
        };

        Arc::new(Self {
            device_id,
            bus,
            tx,
            sink,
            servers: Mutex::new(HashSet::new()),
            routes: Mutex::new(HashMap::new()),
            reject_opens: AtomicBool::new(false),
            dispatcher: Mutex::new(dispatcher),
        })
    }

    /// Make this endpoint refuse every inbound session.
    pub fn set_reject_opens(&self, reject: bool) {
        self.reject_opens.store(reject, Ordering::Relaxed);
    }

    /// Number of open sessions on this endpoint.
    pub fn open_sessions(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    fn post(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            tracing::debug!(device = %self.device_id, "loopback dispatcher gone, delivery dropped");
        }
    }

    fn bus(&self) -> Result<Arc<LoopbackBus>, ChannelError> {
        self.bus.upgrade().ok_or(ChannelError::Closed)
    }

    fn route(&self, session_id: SessionId) -> Result<Route, ChannelError> {
        self.routes
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| ChannelError::SessionNotFound(session_id.to_string()))
    }

    fn peer(&self, route: &Route) -> Result<Arc<LoopbackTransport>, ChannelError> {
        self.bus()?
            .lookup(&route.peer_dev_id)
            .ok_or_else(|| ChannelError::PeerUnreachable(route.peer_dev_id.clone()))
    }

    fn accepts(&self, session_name: &str) -> Result<(), ChannelError> {
        if self.reject_opens.load(Ordering::Relaxed) {
            return Err(ChannelError::PeerUnreachable(self.device_id.clone()));
        }
        if !self.servers.lock().unwrap().contains(session_name) {
            return Err(ChannelError::ServerNotFound(session_name.to_string()));
        }
        Ok(())
    }

    fn drop_route(&self, session_id: SessionId) -> bool {
        if self.routes.lock().unwrap().remove(&session_id).is_some() {
            self.post(Delivery::Closed(session_id));
            true
        } else {
            false
        }
    }
}

impl ChannelTransport for LoopbackTransport {
    fn local_device_id(&self) -> &str {
        &self.device_id
    }

    fn set_event_sink(&self, sink: Weak<dyn TransportEventSink>) {
        *self.sink.write().unwrap() = Some(sink);
    }

    fn create_server(&self, _pkg_name: &str, session_name: &str) -> Result<(), ChannelError> {
        self.servers
            .lock()
            .unwrap()
            .insert(session_name.to_string());
        Ok(())
    }

    fn remove_server(&self, _pkg_name: &str, session_name: &str) -> Result<(), ChannelError> {
        if self.servers.lock().unwrap().remove(session_name) {
            Ok(())
        } else {
            Err(ChannelError::ServerNotFound(session_name.to_string()))
        }
    }

    fn open_session(
        &self,
        session_name: &str,
        peer_session_name: &str,
        peer_dev_id: &str,
    ) -> Result<SessionId, ChannelError> {
        let bus = self.bus()?;
        let peer = bus
            .lookup(peer_dev_id)
            .ok_or_else(|| ChannelError::PeerUnreachable(peer_dev_id.to_string()))?;

        let local_id = bus.session_id();
        let local_info = SessionInfo {
            session_name: session_name.to_string(),
            peer_dev_id: peer_dev_id.to_string(),
        };

        if let Err(err) = peer.accepts(peer_session_name) {
            self.post(Delivery::Opened {
                session_id: local_id,
                info: local_info,
                result: Err(err),
            });
            return Ok(local_id);
        }

        let remote_id = bus.session_id();
        peer.routes.lock().unwrap().insert(
            remote_id,
            Route {
                peer_dev_id: self.device_id.clone(),
                peer_session_id: local_id,
            },
        );
        self.routes.lock().unwrap().insert(
            local_id,
            Route {
                peer_dev_id: peer_dev_id.to_string(),
                peer_session_id: remote_id,
            },
        );

        peer.post(Delivery::Opened {
            session_id: remote_id,
            info: SessionInfo {
                session_name: peer_session_name.to_string(),
                peer_dev_id: self.device_id.clone(),
            },
            result: Ok(()),
        });
        self.post(Delivery::Opened {
            session_id: local_id,
            info: local_info,
            result: Ok(()),
        });
        Ok(local_id)
    }

    fn close_session(&self, session_id: SessionId) {
        let Ok(route) = self.route(session_id) else {
            return;
        };
        self.drop_route(session_id);
        if let Ok(peer) = self.peer(&route) {
            peer.drop_route(route.peer_session_id);
        }
    }

    fn send_bytes(&self, session_id: SessionId, data: &[u8]) -> Result<(), ChannelError> {
        let route = self.route(session_id)?;
        let peer = self.peer(&route)?;
        peer.post(Delivery::Bytes(route.peer_session_id, Bytes::copy_from_slice(data)));
        Ok(())
    }

    fn send_stream(&self, session_id: SessionId, data: &[u8], ext: &[u8]) -> Result<(), ChannelError> {
        let route = self.route(session_id)?;
        let peer = self.peer(&route)?;
        peer.post(Delivery::Stream(
            route.peer_session_id,
            Bytes::copy_from_slice(data),
            Bytes::copy_from_slice(ext),
        ));
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        let _ = self.tx.send(Delivery::Shutdown);
        let Some(handle) = self.dispatcher.lock().unwrap().take() else {
            return;
        };
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            tracing::error!(device = %self.device_id, "loopback dispatcher panicked");
        }
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("device_id", &self.device_id)
            .field("sessions", &self.open_sessions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Opened(String, bool),
        Closed(SessionId),
        Bytes(Vec<u8>),
    }

    struct Recorder(Mutex<mpsc::Sender<Seen>>);

    impl TransportEventSink for Recorder {
        fn on_session_opened(&self, _id: SessionId, info: SessionInfo, result: Result<(), ChannelError>) {
            let _ = self
                .0
                .lock()
                .unwrap()
                .send(Seen::Opened(info.session_name, result.is_ok()));
        }

        fn on_session_closed(&self, session_id: SessionId) {
            let _ = self.0.lock().unwrap().send(Seen::Closed(session_id));
        }

        fn on_bytes_received(&self, _id: SessionId, data: Bytes) {
            let _ = self.0.lock().unwrap().send(Seen::Bytes(data.to_vec()));
        }

        fn on_stream_received(&self, _id: SessionId, _data: Bytes, _ext: Bytes) {}
    }

    fn recorder() -> (Arc<Recorder>, mpsc::Receiver<Seen>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Recorder(Mutex::new(tx))), rx)
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_open_send_close() {
        let bus = LoopbackBus::new();
        let a = bus.endpoint("dev-a");
        let b = bus.endpoint("dev-b");
        let (sink_a, rx_a) = recorder();
        let (sink_b, rx_b) = recorder();
        a.set_event_sink(Arc::downgrade(&sink_a) as Weak<dyn TransportEventSink>);
        b.set_event_sink(Arc::downgrade(&sink_b) as Weak<dyn TransportEventSink>);

        b.create_server("pkg", "srv").unwrap();
        let id = a.open_session("cli", "srv", "dev-b").unwrap();
        assert_eq!(rx_a.recv_timeout(WAIT).unwrap(), Seen::Opened("cli".into(), true));
        assert_eq!(rx_b.recv_timeout(WAIT).unwrap(), Seen::Opened("srv".into(), true));

        a.send_bytes(id, b"hello").unwrap();
        assert_eq!(rx_b.recv_timeout(WAIT).unwrap(), Seen::Bytes(b"hello".to_vec()));

        a.close_session(id);
        assert_eq!(rx_a.recv_timeout(WAIT).unwrap(), Seen::Closed(id));
        assert!(matches!(rx_b.recv_timeout(WAIT).unwrap(), Seen::Closed(_)));
        assert_eq!(a.open_sessions(), 0);
        assert_eq!(b.open_sessions(), 0);
    }

    #[test]
    fn test_open_without_server_fails_async() {
        let bus = LoopbackBus::new();
        let a = bus.endpoint("dev-a");
        let _b = bus.endpoint("dev-b");
        let (sink_a, rx_a) = recorder();
        a.set_event_sink(Arc::downgrade(&sink_a) as Weak<dyn TransportEventSink>);

        a.open_session("cli", "srv", "dev-b").unwrap();
        assert_eq!(rx_a.recv_timeout(WAIT).unwrap(), Seen::Opened("cli".into(), false));
        assert_eq!(
            a.open_session("cli", "srv", "dev-missing"),
            Err(ChannelError::PeerUnreachable("dev-missing".into()))
        );
    }
}
