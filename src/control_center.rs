//! Boundary to the control center that coordinates the engines of one
//! device.
//!
//! Engines call into a [`ControlCenter`] through the [`ControlCenterKit`]
//! façade, and receive instructions back through [`ControlCenterCallback`].
//! [`LocalControlCenter`] is an in-process implementation that relays
//! events between the engines registered with it.

use crate::engine::{AvTransTag, TransRole};
use crate::error::{EngineError, EngineResult};
use crate::event::AvTransEvent;
use crate::memory::AvTransSharedMemory;
use crate::util::anonymize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Instructions a control center sends to an engine.
pub trait ControlCenterCallback: Send + Sync {
    /// Apply a parameter.
    fn set_parameter(&self, tag: AvTransTag, value: &str) -> EngineResult;

    /// Bind the master clock region.
    fn set_shared_memory(&self, memory: &AvTransSharedMemory) -> EngineResult;

    /// Deliver an event relayed from another engine.
    fn notify(&self, event: &AvTransEvent) -> EngineResult;
}

/// The control center contract.
pub trait ControlCenter: Send + Sync {
    /// Register an engine and return its id.
    fn initialize(&self, role: TransRole) -> EngineResult<i32>;

    /// Forget an engine.
    fn release(&self, engine_id: i32) -> EngineResult;

    /// Record that the engine opened a control channel to `peer_dev_id`.
    fn create_control_channel(&self, engine_id: i32, peer_dev_id: &str) -> EngineResult;

    /// Relay an event from the engine.
    fn notify(&self, engine_id: i32, event: &AvTransEvent) -> EngineResult;

    /// Install the engine's callback.
    fn register_ctl_center_callback(
        &self,
        engine_id: i32,
        callback: Weak<dyn ControlCenterCallback>,
    ) -> EngineResult;
}

/// Engine-side handle to a control center.
///
/// A kit without a proxy answers every call with
/// [`EngineError::NullPointer`].
#[derive(Clone, Default)]
pub struct ControlCenterKit {
    proxy: Option<Arc<dyn ControlCenter>>,
}

impl ControlCenterKit {
    /// Kit bound to `proxy`.
    pub fn new(proxy: Arc<dyn ControlCenter>) -> Self {
        Self { proxy: Some(proxy) }
    }

    /// Kit bound to nothing.
    pub fn detached() -> Self {
        Self::default()
    }

    fn proxy(&self) -> EngineResult<&Arc<dyn ControlCenter>> {
        self.proxy.as_ref().ok_or_else(|| {
            tracing::warn!("control center proxy is null");
            EngineError::NullPointer
        })
    }

    /// See [`ControlCenter::initialize`].
    pub fn initialize(&self, role: TransRole) -> EngineResult<i32> {
        self.proxy()?.initialize(role)
    }

    /// See [`ControlCenter::release`].
    pub fn release(&self, engine_id: i32) -> EngineResult {
        self.proxy()?.release(engine_id)
    }

    /// See [`ControlCenter::create_control_channel`]. An empty peer id is
    /// rejected with [`EngineError::InvalidParamValue`].
    pub fn create_control_channel(&self, engine_id: i32, peer_dev_id: &str) -> EngineResult {
        let proxy = self.proxy()?;
        if peer_dev_id.is_empty() {
            return Err(EngineError::InvalidParamValue);
        }
        proxy.create_control_channel(engine_id, peer_dev_id)
    }

    /// See [`ControlCenter::notify`].
    pub fn notify(&self, engine_id: i32, event: &AvTransEvent) -> EngineResult {
        self.proxy()?.notify(engine_id, event)
    }

    /// See [`ControlCenter::register_ctl_center_callback`].
    pub fn register_ctl_center_callback(
        &self,
        engine_id: i32,
        callback: Weak<dyn ControlCenterCallback>,
    ) -> EngineResult {
        self.proxy()?.register_ctl_center_callback(engine_id, callback)
    }
}

impl std::fmt::Debug for ControlCenterKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCenterKit")
            .field("bound", &self.proxy.is_some())
            .finish()
    }
}

struct Registration {
    role: TransRole,
    peers: Vec<String>,
    callback: Option<Weak<dyn ControlCenterCallback>>,
}

/// In-process control center.
///
/// Engine ids start at 1. Events an engine notifies are relayed to every
/// other registered engine whose callback is still alive.
pub struct LocalControlCenter {
    next_id: AtomicI32,
    engines: Mutex<HashMap<i32, Registration>>,
}

impl LocalControlCenter {
    /// Create an empty control center.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI32::new(1),
            engines: Mutex::new(HashMap::new()),
        })
    }

    /// Number of registered engines.
    pub fn engine_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    /// Role an engine registered with.
    pub fn role(&self, engine_id: i32) -> Option<TransRole> {
        self.engines.lock().unwrap().get(&engine_id).map(|r| r.role)
    }

    /// Peers an engine opened control channels to.
    pub fn peers(&self, engine_id: i32) -> Vec<String> {
        self.engines
            .lock()
            .unwrap()
            .get(&engine_id)
            .map(|r| r.peers.clone())
            .unwrap_or_default()
    }
}

impl ControlCenter for LocalControlCenter {
    fn initialize(&self, role: TransRole) -> EngineResult<i32> {
        let engine_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.engines.lock().unwrap().insert(
            engine_id,
            Registration {
                role,
                peers: Vec::new(),
                callback: None,
            },
        );
        tracing::debug!(engine_id, role = role.as_str(), "engine registered");
        Ok(engine_id)
    }

    fn release(&self, engine_id: i32) -> EngineResult {
        self.engines
            .lock()
            .unwrap()
            .remove(&engine_id)
            .map(|_| ())
            .ok_or(EngineError::EngineNotFound)
    }

    fn create_control_channel(&self, engine_id: i32, peer_dev_id: &str) -> EngineResult {
        let mut engines = self.engines.lock().unwrap();
        let registration = engines.get_mut(&engine_id).ok_or(EngineError::EngineNotFound)?;
        if !registration.peers.iter().any(|p| p == peer_dev_id) {
            registration.peers.push(peer_dev_id.to_string());
        }
        tracing::debug!(engine_id, peer = %anonymize(peer_dev_id), "control channel recorded");
        Ok(())
    }

    fn notify(&self, engine_id: i32, event: &AvTransEvent) -> EngineResult {
        let targets: Vec<Arc<dyn ControlCenterCallback>> = {
            let engines = self.engines.lock().unwrap();
            if !engines.contains_key(&engine_id) {
                return Err(EngineError::EngineNotFound);
            }
            engines
                .iter()
                .filter(|(id, _)| **id != engine_id)
                .filter_map(|(_, r)| r.callback.as_ref().and_then(Weak::upgrade))
                .collect()
        };
        for target in targets {
            if let Err(err) = target.notify(event) {
                tracing::warn!(engine_id, error = %err, "event relay failed");
            }
        }
        Ok(())
    }

    fn register_ctl_center_callback(
        &self,
        engine_id: i32,
        callback: Weak<dyn ControlCenterCallback>,
    ) -> EngineResult {
        let mut engines = self.engines.lock().unwrap();
        let registration = engines.get_mut(&engine_id).ok_or(EngineError::EngineNotFound)?;
        registration.callback = Some(callback);
        Ok(())
    }
}

impl std::fmt::Debug for LocalControlCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalControlCenter")
            .field("engines", &self.engine_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<AvTransEvent>>,
        params: Mutex<Vec<(AvTransTag, String)>>,
    }

    impl ControlCenterCallback for Recorder {
        fn set_parameter(&self, tag: AvTransTag, value: &str) -> EngineResult {
            self.params.lock().unwrap().push((tag, value.to_string()));
            Ok(())
        }

        fn set_shared_memory(&self, memory: &AvTransSharedMemory) -> EngineResult {
            self.set_parameter(AvTransTag::SharedMemoryFd, &memory.marshal())
        }

        fn notify(&self, event: &AvTransEvent) -> EngineResult {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_detached_kit_is_null() {
        let kit = ControlCenterKit::detached();
        assert_eq!(kit.initialize(TransRole::AvSender), Err(EngineError::NullPointer));
        assert_eq!(kit.release(1), Err(EngineError::NullPointer));
        assert_eq!(kit.create_control_channel(1, "peer"), Err(EngineError::NullPointer));
        let event = AvTransEvent::new(EventType::Unknown, "", "");
        assert_eq!(kit.notify(1, &event), Err(EngineError::NullPointer));
    }

    #[test]
    fn test_kit_rejects_empty_peer() {
        let center = LocalControlCenter::new();
        let kit = ControlCenterKit::new(center.clone());
        let id = kit.initialize(TransRole::AvReceiver).unwrap();
        assert_eq!(kit.create_control_channel(id, ""), Err(EngineError::InvalidParamValue));
        kit.create_control_channel(id, "peer").unwrap();
        kit.create_control_channel(id, "peer").unwrap();
        assert_eq!(center.peers(id), ["peer"]);
    }

    #[test]
    fn test_ids_and_release() {
        let center = LocalControlCenter::new();
        let first = center.initialize(TransRole::AvSender).unwrap();
        let second = center.initialize(TransRole::AvReceiver).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(center.role(second), Some(TransRole::AvReceiver));

        center.release(first).unwrap();
        assert_eq!(center.release(first), Err(EngineError::EngineNotFound));
        assert_eq!(center.engine_count(), 1);
    }

    #[test]
    fn test_notify_relays_to_other_engines() {
        let center = LocalControlCenter::new();
        let a = center.initialize(TransRole::AvSender).unwrap();
        let b = center.initialize(TransRole::AvReceiver).unwrap();
        let c = center.initialize(TransRole::AvReceiver).unwrap();

        let rec_a = Arc::new(Recorder::default());
        let rec_b = Arc::new(Recorder::default());
        center
            .register_ctl_center_callback(a, Arc::downgrade(&rec_a) as Weak<dyn ControlCenterCallback>)
            .unwrap();
        center
            .register_ctl_center_callback(b, Arc::downgrade(&rec_b) as Weak<dyn ControlCenterCallback>)
            .unwrap();

        let event = AvTransEvent::new(EventType::StartSuccess, "ready", "peer");
        center.notify(a, &event).unwrap();
        assert!(rec_a.events.lock().unwrap().is_empty());
        assert_eq!(*rec_b.events.lock().unwrap(), [event.clone()]);

        drop(rec_b);
        center.notify(c, &event).unwrap();
        assert_eq!(rec_a.events.lock().unwrap().len(), 1);
        assert_eq!(center.notify(99, &event), Err(EngineError::EngineNotFound));
    }
}
