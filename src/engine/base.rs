//! State machine shared by both engine roles.

use super::types::{AvTransTag, ChannelAttribute, HardwareType, StateId, TransRole};
use super::{EngineCallback, EngineContext};
use crate::buffer::AvTransBuffer;
use crate::channel::{ChannelDescription, ChannelListener};
use crate::control_center::ControlCenterCallback;
use crate::error::{EngineError, EngineResult};
use crate::event::{AvTransEvent, AvTransMessage, EventType, cast_event_type};
use crate::filter::{AvInputFilter, AvOutputFilter, CodecFilter, Filter, FilterEventReceiver};
use crate::format::{MediaType, mime};
use crate::memory::AvTransSharedMemory;
use crate::observability::{span_engine, trace_state_change};
use crate::pipeline::{PipelineCore, PipelineState};
use crate::plugin::{DataCallback, ParamValue, PluginEvent, Tag};
use crate::plugins::{
    LOCAL_AUDIO_SERVICE_INPUT, LOCAL_AUDIO_SERVICE_OUTPUT, LOCAL_SCREEN_SERVICE_INPUT,
    LOCAL_SCREEN_SERVICE_OUTPUT, MESH_CHANNEL_INPUT, MESH_CHANNEL_OUTPUT, PASSTHROUGH_CODEC,
};
use crate::util::{anonymize, parse_object};
use bytes::Bytes;
use serde_json::Value;
use std::cell::Cell;
use std::sync::{Arc, Mutex, RwLock, Weak};

const FILTER_INPUT: &str = "avInput";
const FILTER_CODEC: &str = "avCodec";
const FILTER_OUTPUT: &str = "avOutput";

thread_local! {
    /// Set while this thread runs a data callback.
    static IN_DELIVERY: Cell<bool> = const { Cell::new(false) };
}

#[derive(Default)]
struct Inner {
    media_type: Option<MediaType>,
    pipeline: Option<Arc<PipelineCore>>,
    input: Option<Arc<AvInputFilter>>,
    codec: Option<Arc<CodecFilter>>,
    output: Option<Arc<AvOutputFilter>>,
    engine_id: Option<i32>,
    peers: Vec<String>,
}

impl Inner {
    /// Filters in pipeline order.
    fn filters(&self) -> Vec<Arc<dyn Filter>> {
        let mut filters: Vec<Arc<dyn Filter>> = Vec::with_capacity(3);
        if let Some(input) = &self.input {
            filters.push(Arc::clone(input) as Arc<dyn Filter>);
        }
        if let Some(codec) = &self.codec {
            filters.push(Arc::clone(codec) as Arc<dyn Filter>);
        }
        if let Some(output) = &self.output {
            filters.push(Arc::clone(output) as Arc<dyn Filter>);
        }
        filters
    }
}

/// Engine state and operations, wrapped by the sender and receiver types.
///
/// Locking:
/// - `op_lock` serializes public operations and control-channel state
///   changes, so check-then-act on the state is atomic.
/// - `state` is a short lock the data path reads without `op_lock`.
/// - Data-plane events and buffers never take `op_lock`: they can arrive
///   while an operation waits for the thread delivering them.
/// - `delivery` is read-held across each data callback. Leaving `Started`
///   takes it for writing, so no buffer reaches the callback afterwards.
pub(crate) struct EngineCore {
    role: TransRole,
    owner_name: String,
    peer_dev_id: String,
    session_name: String,
    ctx: EngineContext,
    op_lock: Mutex<()>,
    state: Mutex<StateId>,
    delivery: RwLock<()>,
    inner: Mutex<Inner>,
    callback: Mutex<Option<Arc<dyn EngineCallback>>>,
    this: Weak<EngineCore>,
}

impl EngineCore {
    pub(crate) fn new(
        role: TransRole,
        ctx: EngineContext,
        owner_name: &str,
        peer_dev_id: &str,
    ) -> Arc<Self> {
        let session_name = format!(
            "{owner_name}{}.{}",
            ctx.config.control_session_suffix,
            role.as_str()
        );
        Arc::new_cyclic(|this| Self {
            role,
            owner_name: owner_name.to_string(),
            peer_dev_id: peer_dev_id.to_string(),
            session_name,
            ctx,
            op_lock: Mutex::new(()),
            state: Mutex::new(StateId::Idle),
            delivery: RwLock::new(()),
            inner: Mutex::new(Inner::default()),
            callback: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub(crate) fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub(crate) fn peer_dev_id(&self) -> &str {
        &self.peer_dev_id
    }

    pub(crate) fn session_name(&self) -> &str {
        &self.session_name
    }

    pub(crate) fn state(&self) -> StateId {
        *self.state.lock().unwrap()
    }

    pub(crate) fn engine_id(&self) -> Option<i32> {
        self.inner.lock().unwrap().engine_id
    }

    pub(crate) fn pipeline_state(&self) -> Option<PipelineState> {
        let pipeline = self.inner.lock().unwrap().pipeline.clone();
        pipeline.map(|p| p.state())
    }

    pub(crate) fn filters(&self) -> Vec<Arc<dyn Filter>> {
        self.inner.lock().unwrap().filters()
    }

    fn set_state(&self, next: StateId) {
        let left_started = {
            let mut state = self.state.lock().unwrap();
            if *state == next {
                return;
            }
            trace_state_change(self.role.as_str(), &*state, &next);
            let left_started = *state == StateId::Started;
            *state = next;
            left_started
        };
        // Wait out callbacks that passed the state check. A callback that
        // stops its own engine is the in-flight delivery itself.
        if left_started && !IN_DELIVERY.with(Cell::get) {
            drop(self.delivery.write().unwrap());
        }
    }

    pub(crate) fn register_callback(&self, callback: Option<Arc<dyn EngineCallback>>) -> EngineResult {
        let callback = callback.ok_or(EngineError::InvalidParam)?;
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn callback(&self) -> Option<Arc<dyn EngineCallback>> {
        self.callback.lock().unwrap().clone()
    }

    fn forward_event(&self, event: &AvTransEvent) {
        match self.callback() {
            Some(callback) => callback.on_event(event),
            None => tracing::debug!(event = ?event.event_type, "no callback, event dropped"),
        }
    }

    /// Report a stream added to or removed from the engine's session.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParam`] for any other event type.
    pub(crate) fn notify_stream_change(&self, event_type: EventType) -> EngineResult {
        if !matches!(event_type, EventType::AddStream | EventType::RemoveStream) {
            return Err(EngineError::InvalidParam);
        }
        tracing::debug!(event = ?event_type, owner = %self.owner_name, "stream change");
        self.forward_event(&AvTransEvent::new(
            event_type,
            self.owner_name.clone(),
            self.peer_dev_id.clone(),
        ));
        Ok(())
    }

    pub(crate) fn initialize(&self) -> EngineResult {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "initialize").entered();
        let _op = self.op_lock.lock().unwrap();
        if self.state() != StateId::Idle {
            tracing::warn!(state = ?self.state(), "initialize in wrong state");
            return Err(EngineError::InitFailed);
        }
        let Some(hardware) = HardwareType::from_owner(&self.owner_name) else {
            tracing::warn!("unknown owner name");
            return Err(EngineError::InitFailed);
        };
        if self.session_name.is_empty() || self.peer_dev_id.is_empty() {
            return Err(EngineError::InitFailed);
        }

        self.create_filters(hardware.media_type());
        let result = self
            .init_pipeline()
            .and_then(|()| self.seed_params(hardware))
            .and_then(|()| self.attach_control_center())
            .and_then(|()| self.bind_control_session());
        if let Err(err) = result {
            tracing::warn!(error = %err, "initialize failed");
            self.detach_control_center();
            self.teardown_pipeline();
            return Err(EngineError::InitFailed);
        }

        self.inner.lock().unwrap().media_type = Some(hardware.media_type());
        tracing::info!(
            session = %self.session_name,
            peer = %anonymize(&self.peer_dev_id),
            media = ?hardware.media_type(),
            "engine initialized"
        );
        self.set_state(StateId::Initialized);
        Ok(())
    }

    fn create_filters(&self, media_type: MediaType) {
        let registry = &self.ctx.registry;
        let plugin_ctx = self.ctx.plugin_context();
        let (input_plugin, output_plugin) = match (self.role, media_type) {
            (TransRole::AvSender, MediaType::Video) => (LOCAL_SCREEN_SERVICE_INPUT, MESH_CHANNEL_OUTPUT),
            (TransRole::AvSender, MediaType::Audio) => (LOCAL_AUDIO_SERVICE_INPUT, MESH_CHANNEL_OUTPUT),
            (TransRole::AvReceiver, MediaType::Video) => (MESH_CHANNEL_INPUT, LOCAL_SCREEN_SERVICE_OUTPUT),
            (TransRole::AvReceiver, MediaType::Audio) => (MESH_CHANNEL_INPUT, LOCAL_AUDIO_SERVICE_OUTPUT),
        };

        let input = AvInputFilter::new(
            FILTER_INPUT,
            Some(input_plugin),
            Arc::clone(registry),
            plugin_ctx.clone(),
        );
        let codec = (media_type == MediaType::Video).then(|| {
            CodecFilter::new(
                FILTER_CODEC,
                Some(PASSTHROUGH_CODEC),
                Arc::clone(registry),
                plugin_ctx.clone(),
            )
        });
        let output = AvOutputFilter::new(
            FILTER_OUTPUT,
            Some(output_plugin),
            Arc::clone(registry),
            plugin_ctx,
        );
        if self.role == TransRole::AvReceiver {
            output.set_data_sink(self.data_sink());
        }

        let mut inner = self.inner.lock().unwrap();
        inner.input = Some(input);
        inner.codec = codec;
        inner.output = Some(output);
    }

    /// Build the pipeline over the created filters and link them in order.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParamValue`] when a pipeline already exists or
    /// the input or output filter is missing.
    pub(crate) fn init_pipeline(&self) -> EngineResult {
        let filters = {
            let inner = self.inner.lock().unwrap();
            if inner.pipeline.is_some() || inner.input.is_none() || inner.output.is_none() {
                return Err(EngineError::InvalidParamValue);
            }
            inner.filters()
        };

        let pipeline = Arc::new(PipelineCore::new());
        let mut ids = Vec::with_capacity(filters.len());
        for filter in filters {
            ids.push(pipeline.add_filter(filter).map_err(|err| {
                tracing::warn!(error = %err, "cannot add filter");
                EngineError::InvalidParamValue
            })?);
        }
        for pair in ids.windows(2) {
            pipeline.link(pair[0], pair[1]).map_err(|err| {
                tracing::warn!(error = %err, "cannot link filters");
                EngineError::InvalidParamValue
            })?;
        }
        let receiver: Weak<EngineCore> = self.this.clone();
        pipeline.init(receiver).map_err(|err| {
            tracing::warn!(error = %err, "cannot init filters");
            EngineError::InvalidParamValue
        })?;

        self.inner.lock().unwrap().pipeline = Some(pipeline);
        Ok(())
    }

    fn seed_params(&self, hardware: HardwareType) -> EngineResult {
        let media_type = hardware.media_type();
        let default_mime = match media_type {
            MediaType::Video => mime::VIDEO_H264,
            MediaType::Audio => mime::AUDIO_RAW,
        };
        let description = ChannelDescription::new(&self.owner_name, &self.peer_dev_id).marshal();
        let params = [
            (Tag::Mime, ParamValue::Str(default_mime.to_string())),
            (Tag::MediaType, ParamValue::MediaType(media_type)),
            (Tag::MediaDescription, ParamValue::Str(description)),
            (Tag::MediaTitle, ParamValue::Str(hardware.media_title().to_string())),
        ];
        for filter in self.filters() {
            for (tag, value) in &params {
                filter.set_parameter(*tag, value.clone()).map_err(|err| {
                    tracing::warn!(filter = %filter.name(), ?tag, error = %err, "cannot seed parameter");
                    EngineError::InitFailed
                })?;
            }
        }
        Ok(())
    }

    fn attach_control_center(&self) -> EngineResult {
        let Some(kit) = &self.ctx.control_center else {
            return Ok(());
        };
        let engine_id = kit.initialize(self.role)?;
        self.inner.lock().unwrap().engine_id = Some(engine_id);
        let callback: Weak<EngineCore> = self.this.clone();
        kit.register_ctl_center_callback(engine_id, callback)?;
        tracing::debug!(engine_id, "control center attached");
        Ok(())
    }

    fn detach_control_center(&self) {
        let engine_id = self.inner.lock().unwrap().engine_id.take();
        if let (Some(kit), Some(engine_id)) = (&self.ctx.control_center, engine_id) {
            if let Err(err) = kit.release(engine_id) {
                tracing::warn!(engine_id, error = %err, "control center release failed");
            }
        }
    }

    /// Serve the control session, then listen on it. The listener goes last
    /// so a failure never has to unregister under `op_lock`.
    fn bind_control_session(&self) -> EngineResult {
        let channel = &self.ctx.channel;
        channel.create_channel_server(&self.session_name).map_err(|err| {
            tracing::warn!(session = %self.session_name, error = %err, "cannot create control server");
            EngineError::InitFailed
        })?;
        let listener: Weak<EngineCore> = self.this.clone();
        if let Err(err) = channel.register_channel_listener(&self.session_name, &self.peer_dev_id, listener) {
            tracing::warn!(session = %self.session_name, error = %err, "cannot listen on control session");
            let _ = channel.remove_channel_server(&self.session_name);
            return Err(EngineError::InitFailed);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.peers.clear();
        inner.peers.push(self.peer_dev_id.clone());
        Ok(())
    }

    fn teardown_pipeline(&self) {
        let pipeline = {
            let mut inner = self.inner.lock().unwrap();
            let pipeline = inner.pipeline.take();
            inner.input = None;
            inner.codec = None;
            inner.output = None;
            inner.media_type = None;
            pipeline
        };
        if let Some(pipeline) = pipeline {
            if let Err(err) = pipeline.stop() {
                tracing::debug!(error = %err, "pipeline stop failed");
            }
            let _ = pipeline.reset();
        }
    }

    pub(crate) fn create_control_channel(&self, peers: &[String], attr: ChannelAttribute) -> EngineResult {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "create_control_channel").entered();
        if peers.is_empty() {
            return Err(EngineError::NullPointer);
        }
        let _op = self.op_lock.lock().unwrap();
        if self.state() == StateId::Idle {
            tracing::warn!("control channel requested before initialize");
            return Err(EngineError::CreateChannelFailed);
        }

        let engine_id = self.engine_id();
        let mut failed = 0usize;
        for peer in peers {
            if let Err(err) = self.open_control_session(peer) {
                tracing::warn!(peer = %anonymize(peer), error = %err, "cannot open control session");
                failed += 1;
                continue;
            }
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.peers.contains(peer) {
                    inner.peers.push(peer.clone());
                }
            }
            if let (Some(kit), Some(engine_id)) = (&self.ctx.control_center, engine_id) {
                if let Err(err) = kit.create_control_channel(engine_id, peer) {
                    tracing::warn!(peer = %anonymize(peer), error = %err, "control center refused channel");
                    failed += 1;
                }
            }
        }
        tracing::debug!(peers = peers.len(), failed, strategy = ?attr.strategy, "control channels requested");
        if failed > 0 {
            return Err(EngineError::CreateChannelFailed);
        }
        Ok(())
    }

    fn open_control_session(&self, peer: &str) -> EngineResult {
        if peer.is_empty() {
            return Err(EngineError::InvalidParamValue);
        }
        let channel = &self.ctx.channel;
        if !channel.has_listener(&self.session_name, peer) {
            let listener: Weak<EngineCore> = self.this.clone();
            channel
                .register_channel_listener(&self.session_name, peer, listener)
                .map_err(|_| EngineError::CreateChannelFailed)?;
        }
        channel
            .create_channel(&self.session_name, peer)
            .map(|_| ())
            .map_err(|_| EngineError::CreateChannelFailed)
    }

    pub(crate) fn start(&self) -> EngineResult {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "start").entered();
        let _op = self.op_lock.lock().unwrap();
        if self.state() != StateId::ChCreated {
            tracing::warn!(state = ?self.state(), "start in wrong state");
            return Err(EngineError::StartFailed);
        }
        let pipeline = self
            .inner
            .lock()
            .unwrap()
            .pipeline
            .clone()
            .ok_or(EngineError::StartFailed)?;

        if pipeline.state() == PipelineState::Created {
            pipeline.prepare().map_err(|err| {
                tracing::warn!(error = %err, "pipeline prepare failed");
                EngineError::StartFailed
            })?;
        }
        pipeline.start().map_err(|err| {
            tracing::warn!(error = %err, "pipeline start failed");
            EngineError::StartFailed
        })?;
        self.set_state(StateId::Started);
        Ok(())
    }

    pub(crate) fn stop(&self) -> EngineResult {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "stop").entered();
        let _op = self.op_lock.lock().unwrap();
        match self.state() {
            StateId::ChCreated | StateId::Started => {}
            state => {
                tracing::warn!(?state, "stop in wrong state");
                return Err(EngineError::StopFailed);
            }
        }
        self.set_state(StateId::Initialized);
        self.stop_pipeline();
        Ok(())
    }

    fn stop_pipeline(&self) {
        let pipeline = self.inner.lock().unwrap().pipeline.clone();
        if let Some(pipeline) = pipeline {
            if let Err(err) = pipeline.stop() {
                tracing::warn!(error = %err, "pipeline stop failed");
            }
        }
    }

    pub(crate) fn set_parameter(&self, tag: AvTransTag, value: &str) -> EngineResult {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "set_parameter").entered();
        let _op = self.op_lock.lock().unwrap();
        self.apply_parameter(tag, value)
    }

    /// Translate and apply a parameter to every filter. Caller holds
    /// `op_lock`.
    fn apply_parameter(&self, tag: AvTransTag, value: &str) -> EngineResult {
        if tag == AvTransTag::Invalid {
            return Err(EngineError::SetupFailed);
        }
        let (media_type, filters) = {
            let inner = self.inner.lock().unwrap();
            match (inner.media_type, inner.pipeline.is_some()) {
                (Some(media_type), true) => (media_type, inner.filters()),
                _ => return Err(EngineError::SetupFailed),
            }
        };
        let params = tag.translate(value, media_type)?;
        for filter in &filters {
            for (param, value) in &params {
                filter.set_parameter(*param, value.clone()).map_err(|err| {
                    tracing::warn!(filter = %filter.name(), tag = tag.name(), error = %err, "set parameter failed");
                    EngineError::SetupFailed
                })?;
            }
        }
        tracing::debug!(tag = tag.name(), "parameter applied");
        Ok(())
    }

    pub(crate) fn prepare_pipeline(&self, config: &str) -> EngineResult {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "prepare_pipeline").entered();
        let _op = self.op_lock.lock().unwrap();
        if self.state() != StateId::Initialized {
            tracing::warn!(state = ?self.state(), "prepare in wrong state");
            return Err(EngineError::PrepareFailed);
        }
        let pipeline = self
            .inner
            .lock()
            .unwrap()
            .pipeline
            .clone()
            .ok_or(EngineError::PrepareFailed)?;

        if !config.trim().is_empty() {
            let obj = parse_object(config).map_err(|err| {
                tracing::warn!(error = %err, "bad pipeline config");
                EngineError::PrepareFailed
            })?;
            for (key, value) in &obj {
                let tag = AvTransTag::from_name(key).ok_or_else(|| {
                    tracing::warn!(key = %key, "unknown pipeline config key");
                    EngineError::PrepareFailed
                })?;
                let text = match value {
                    Value::String(text) => text.clone(),
                    Value::Number(number) => number.to_string(),
                    _ => return Err(EngineError::PrepareFailed),
                };
                self.apply_parameter(tag, &text)
                    .map_err(|_| EngineError::PrepareFailed)?;
            }
        }

        pipeline.prepare().map_err(|err| {
            tracing::warn!(error = %err, "pipeline prepare failed");
            EngineError::PrepareFailed
        })
    }

    pub(crate) fn send_message(&self, message: Option<&AvTransMessage>) -> EngineResult {
        let message = message
            .filter(|m| !m.content.is_empty())
            .ok_or(EngineError::InvalidParam)?;
        let _op = self.op_lock.lock().unwrap();
        match self.state() {
            StateId::ChCreated | StateId::Started => {}
            state => {
                tracing::warn!(?state, "send message in wrong state");
                return Err(EngineError::SendDataFailed);
            }
        }
        let dst = if message.dst_dev_id.is_empty() {
            self.peer_dev_id.as_str()
        } else {
            message.dst_dev_id.as_str()
        };
        self.ctx
            .channel
            .send_bytes_data(&self.session_name, dst, message.marshal().as_bytes())
            .map_err(|err| {
                tracing::warn!(peer = %anonymize(dst), error = %err, "send message failed");
                EngineError::SendDataFailed
            })
    }

    pub(crate) fn push_data(&self, buffer: AvTransBuffer) -> EngineResult {
        if self.state() != StateId::Started {
            return Err(EngineError::PushDataFailed);
        }
        let input = self
            .inner
            .lock()
            .unwrap()
            .input
            .clone()
            .ok_or(EngineError::PushDataFailed)?;
        input.push_data(input.name(), buffer).map_err(|err| {
            tracing::debug!(error = %err, "push data failed");
            EngineError::PushDataFailed
        })
    }

    pub(crate) fn notify_control_center(&self, event: &AvTransEvent) -> EngineResult {
        let kit = self.ctx.control_center.as_ref().ok_or(EngineError::NullPointer)?;
        let engine_id = self.engine_id().ok_or(EngineError::NullPointer)?;
        kit.notify(engine_id, event)
    }

    pub(crate) fn release(&self) -> EngineResult {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "release").entered();
        let peers = {
            let _op = self.op_lock.lock().unwrap();
            if self.state() == StateId::Idle {
                return Ok(());
            }
            self.set_state(StateId::Idle);
            self.teardown_pipeline();

            let peers = std::mem::take(&mut self.inner.lock().unwrap().peers);
            for peer in &peers {
                self.ctx.channel.close_channel(&self.session_name, peer);
            }
            if let Err(err) = self.ctx.channel.remove_channel_server(&self.session_name) {
                tracing::debug!(error = %err, "control server already gone");
            }
            self.detach_control_center();
            peers
        };
        // Listener removal waits for in-flight dispatch, which may itself be
        // waiting for op_lock.
        for peer in &peers {
            self.ctx
                .channel
                .unregister_channel_listener(&self.session_name, peer);
        }
        tracing::info!("engine released");
        Ok(())
    }

    fn data_sink(&self) -> DataCallback {
        let engine = self.this.clone();
        Arc::new(move |buffer| {
            if let Some(engine) = engine.upgrade() {
                engine.deliver(buffer);
            }
        })
    }

    fn deliver(&self, buffer: AvTransBuffer) {
        let _delivery = self.delivery.read().unwrap();
        let state = self.state();
        if state != StateId::Started {
            tracing::debug!(?state, "engine not started, buffer dropped");
            return;
        }
        let Some(callback) = self.callback() else {
            tracing::debug!("no callback, buffer dropped");
            return;
        };
        let nested = IN_DELIVERY.with(|flag| flag.replace(true));
        callback.on_data_available(buffer);
        IN_DELIVERY.with(|flag| flag.set(nested));
    }

    /// Drive the state machine from a control-session event.
    fn on_session_event(&self, event_type: EventType) {
        let _op = self.op_lock.lock().unwrap();
        let state = self.state();
        match event_type {
            EventType::ChannelOpened => {
                if state == StateId::Initialized {
                    self.set_state(StateId::ChCreated);
                }
            }
            EventType::ChannelOpenFail | EventType::ChannelClosed => {
                if state == StateId::Idle {
                    return;
                }
                self.set_state(StateId::Initialized);
                if state == StateId::Started {
                    self.stop_pipeline();
                }
            }
            _ => {}
        }
    }

    fn on_control_message(&self, event: &AvTransEvent) {
        let message = match AvTransMessage::unmarshal(&event.content, self.ctx.config.max_message_len) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(peer = %anonymize(&event.peer_dev_id), error = %err, "bad control message");
                return;
            }
        };
        match self.callback() {
            Some(callback) => callback.on_message(&message),
            None => tracing::debug!(msg_type = message.msg_type, "no callback, message dropped"),
        }
    }
}

impl ChannelListener for EngineCore {
    fn on_channel_event(&self, event: &AvTransEvent) {
        let _span = span_engine(self.role.as_str(), &self.owner_name, "channel_event").entered();
        tracing::debug!(event = ?event.event_type, peer = %anonymize(&event.peer_dev_id), "control session event");
        match event.event_type {
            EventType::ChannelOpened | EventType::ChannelOpenFail | EventType::ChannelClosed => {
                self.on_session_event(event.event_type);
                self.forward_event(event);
            }
            EventType::DataReceived => self.on_control_message(event),
            other => tracing::debug!(event = ?other, "ignored control session event"),
        }
    }

    fn on_stream_received(&self, data: &Bytes, _ext: &Bytes) {
        tracing::debug!(len = data.len(), "stream packet on control session dropped");
    }
}

impl FilterEventReceiver for EngineCore {
    fn on_filter_event(&self, filter: &str, event: PluginEvent) {
        let event_type = cast_event_type(event.event_type);
        tracing::debug!(filter = %filter, event = ?event_type, "data plane event");
        self.forward_event(&AvTransEvent::new(
            event_type,
            event.description,
            event.peer_dev_id,
        ));
    }
}

impl ControlCenterCallback for EngineCore {
    fn set_parameter(&self, tag: AvTransTag, value: &str) -> EngineResult {
        EngineCore::set_parameter(self, tag, value)
    }

    fn set_shared_memory(&self, memory: &AvTransSharedMemory) -> EngineResult {
        EngineCore::set_parameter(self, AvTransTag::SharedMemoryFd, &memory.marshal())
    }

    fn notify(&self, event: &AvTransEvent) -> EngineResult {
        self.forward_event(event);
        Ok(())
    }
}

impl std::fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCore")
            .field("role", &self.role)
            .field("owner_name", &self.owner_name)
            .field("peer", &anonymize(&self.peer_dev_id))
            .field("state", &self.state())
            .finish()
    }
}
