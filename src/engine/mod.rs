//! Sender and receiver engines.
//!
//! An engine owns one pipeline and the control session to its peer. Both
//! roles share the same state machine:
//!
//! ```text
//! Idle --initialize--> Initialized --(control channel opened)--> ChCreated
//!                           ^  ^                                   |
//!                           |  +------(open fail / closed)---------+
//!                           |                                      | start
//!                           +-------------stop / closed------- Started
//! ```
//!
//! Channel events arrive on the transport dispatch thread; data-plane events
//! arrive from the plugins through the filters. Both are forwarded to the
//! registered [`EngineCallback`].

mod base;
mod receiver;
mod sender;
mod types;

pub use receiver::AvReceiverEngine;
pub use sender::AvSenderEngine;
pub use types::{
    AvTransTag, ChannelAttribute, HardwareType, OWNER_NAME_D_CAMERA, OWNER_NAME_D_MIC,
    OWNER_NAME_D_SCREEN, OWNER_NAME_D_SPEAKER, StateId, TransRole, TransStrategy,
};

use crate::buffer::AvTransBuffer;
use crate::channel::ChannelAdapter;
use crate::config::TransportConfig;
use crate::control_center::ControlCenterKit;
use crate::event::{AvTransEvent, AvTransMessage};
use crate::plugin::{PluginContext, PluginRegistry};
use std::sync::Arc;

/// Receiver of everything an engine reports to its owner.
pub trait EngineCallback: Send + Sync {
    /// Channel and data-plane events.
    fn on_event(&self, event: &AvTransEvent);

    /// Control messages from the peer engine.
    fn on_message(&self, message: &AvTransMessage);

    /// Buffers the receiver pipeline hands to the local service.
    fn on_data_available(&self, _buffer: AvTransBuffer) {}
}

/// Collaborators injected into every engine.
#[derive(Clone)]
pub struct EngineContext {
    /// Plugin factories.
    pub registry: Arc<PluginRegistry>,
    /// Channel adapter shared by the engine and its plugins.
    pub channel: Arc<ChannelAdapter>,
    /// Control center, when the engine runs under one.
    pub control_center: Option<Arc<ControlCenterKit>>,
    /// Shared configuration.
    pub config: Arc<TransportConfig>,
}

impl EngineContext {
    /// Context without a control center.
    pub fn new(
        registry: Arc<PluginRegistry>,
        channel: Arc<ChannelAdapter>,
        config: Arc<TransportConfig>,
    ) -> Self {
        Self {
            registry,
            channel,
            control_center: None,
            config,
        }
    }

    /// Attach a control center.
    pub fn with_control_center(mut self, kit: Arc<ControlCenterKit>) -> Self {
        self.control_center = Some(kit);
        self
    }

    pub(crate) fn plugin_context(&self) -> PluginContext {
        PluginContext {
            channel: Arc::clone(&self.channel),
            config: Arc::clone(&self.config),
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("plugins", &self.registry.len())
            .field("channel", &self.channel)
            .field("control_center", &self.control_center.is_some())
            .finish()
    }
}
