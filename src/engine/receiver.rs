//! Receiving end.

use super::base::EngineCore;
use super::types::{AvTransTag, ChannelAttribute, StateId, TransRole};
use super::{EngineCallback, EngineContext};
use crate::error::EngineResult;
use crate::event::{AvTransEvent, AvTransMessage, EventType};
use crate::filter::Filter;
use crate::pipeline::PipelineState;
use std::sync::Arc;

/// Engine that receives a stream from the peer's sender engine and hands
/// each buffer to [`EngineCallback::on_data_available`].
///
/// The pipeline must be prepared with
/// [`AvReceiverEngine::prepare_pipeline`] before the sender starts, so the
/// data session is served when the sender opens it. Buffers that arrive
/// while the engine is not `Started` are dropped.
#[derive(Debug)]
pub struct AvReceiverEngine {
    core: Arc<EngineCore>,
}

impl AvReceiverEngine {
    /// Create an engine for `owner_name` receiving from `peer_dev_id`.
    pub fn new(ctx: EngineContext, owner_name: &str, peer_dev_id: &str) -> Self {
        Self {
            core: EngineCore::new(TransRole::AvReceiver, ctx, owner_name, peer_dev_id),
        }
    }

    /// Owner name the engine was created for.
    pub fn owner_name(&self) -> &str {
        self.core.owner_name()
    }

    /// Peer device id.
    pub fn peer_dev_id(&self) -> &str {
        self.core.peer_dev_id()
    }

    /// Name of the control session this engine serves.
    pub fn session_name(&self) -> &str {
        self.core.session_name()
    }

    /// Current state.
    pub fn state(&self) -> StateId {
        self.core.state()
    }

    /// Id assigned by the control center, if attached.
    pub fn engine_id(&self) -> Option<i32> {
        self.core.engine_id()
    }

    /// State of the pipeline, once built.
    pub fn pipeline_state(&self) -> Option<PipelineState> {
        self.core.pipeline_state()
    }

    /// Filters in pipeline order.
    pub fn filters(&self) -> Vec<Arc<dyn Filter>> {
        self.core.filters()
    }

    /// `Idle` → `Initialized`.
    pub fn initialize(&self) -> EngineResult {
        self.core.initialize()
    }

    /// Release everything and return to `Idle`.
    pub fn release(&self) -> EngineResult {
        self.core.release()
    }

    /// Open the control session to each peer.
    pub fn create_control_channel(&self, peers: &[String], attr: ChannelAttribute) -> EngineResult {
        self.core.create_control_channel(peers, attr)
    }

    /// `ChCreated` → `Started`.
    pub fn start(&self) -> EngineResult {
        self.core.start()
    }

    /// Stop receiving and return to `Initialized`.
    pub fn stop(&self) -> EngineResult {
        self.core.stop()
    }

    /// Apply a parameter to every filter.
    pub fn set_parameter(&self, tag: AvTransTag, value: &str) -> EngineResult {
        self.core.set_parameter(tag, value)
    }

    /// Apply a JSON object of parameters and prepare the pipeline.
    pub fn prepare_pipeline(&self, config: &str) -> EngineResult {
        self.core.prepare_pipeline(config)
    }

    /// Send a control message to the peer engine.
    pub fn send_message(&self, message: Option<&AvTransMessage>) -> EngineResult {
        self.core.send_message(message)
    }

    /// Report `AddStream` or `RemoveStream` to the registered callback.
    ///
    /// The event carries the owner name as content and the peer device id.
    pub fn notify_stream_change(&self, event_type: EventType) -> EngineResult {
        self.core.notify_stream_change(event_type)
    }

    /// Relay an event to the other engines of the control center.
    pub fn notify_control_center(&self, event: &AvTransEvent) -> EngineResult {
        self.core.notify_control_center(event)
    }

    /// Install the callback that receives events, messages and buffers.
    pub fn register_receiver_callback(&self, callback: Option<Arc<dyn EngineCallback>>) -> EngineResult {
        self.core.register_callback(callback)
    }
}

impl Drop for AvReceiverEngine {
    fn drop(&mut self) {
        if let Err(err) = self.core.release() {
            tracing::warn!(error = %err, "release on drop failed");
        }
    }
}
