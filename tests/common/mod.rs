//! Shared fixtures for the integration tests: a loopback mesh with one
//! engine context per device, a recording callback and a polling wait.

#![allow(dead_code)]

use avtrans::channel::LoopbackTransport;
use avtrans::prelude::*;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEV_A: &str = "device-aaaa-0001";
pub const DEV_B: &str = "device-bbbb-0002";

/// Install a test subscriber and describe the metrics once; `RUST_LOG`
/// controls verbosity.
pub fn init_tracing() {
    avtrans::observability::init_metrics();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One device on the loopback mesh.
pub struct Device {
    pub transport: Arc<LoopbackTransport>,
    pub channel: Arc<ChannelAdapter>,
    pub ctx: EngineContext,
}

impl Device {
    pub fn new(bus: &Arc<LoopbackBus>, device_id: &str) -> Self {
        Self::with_config(bus, device_id, TransportConfig::default())
    }

    pub fn with_config(bus: &Arc<LoopbackBus>, device_id: &str, config: TransportConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(PluginRegistry::new());
        register_builtin(&registry);
        let transport = bus.endpoint(device_id);
        let channel = ChannelAdapter::new(transport.clone(), &config);
        let ctx = EngineContext::new(registry, Arc::clone(&channel), config);
        Self {
            transport,
            channel,
            ctx,
        }
    }

    pub fn with_control_center(mut self, kit: Arc<ControlCenterKit>) -> Self {
        self.ctx = self.ctx.with_control_center(kit);
        self
    }
}

/// Callback recording everything an engine reports.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<AvTransEvent>>,
    pub messages: Mutex<Vec<AvTransMessage>>,
    pub buffers: Mutex<Vec<AvTransBuffer>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handle(self: &Arc<Self>) -> Option<Arc<dyn EngineCallback>> {
        let callback: Arc<dyn EngineCallback> = self.clone();
        Some(callback)
    }

    pub fn saw(&self, event_type: EventType) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.event_type == event_type)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

impl EngineCallback for Recorder {
    fn on_event(&self, event: &AvTransEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_message(&self, message: &AvTransMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }

    fn on_data_available(&self, buffer: AvTransBuffer) {
        self.buffers.lock().unwrap().push(buffer);
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}
