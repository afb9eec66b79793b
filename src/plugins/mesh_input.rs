//! Receiving end of the data channel.

use super::{
    Drain, SessionIdentity, accept_buffer, buffer_from_stream, descriptor_media_type, plugin_event,
};
use crate::buffer::AvTransBuffer;
use crate::channel::{ChannelAdapter, ChannelListener};
use crate::config::TransportConfig;
use crate::error::{PluginError, PluginResult};
use crate::event::AvTransEvent;
use crate::format::MediaType;
use crate::observability::{record_packet_discarded, record_packet_received};
use crate::plugin::{
    AvTransPlugin, DataCallback, ParamValue, PluginCallback, PluginContext, PluginCore,
    PluginDescriptor, PluginKind, PluginState, Tag,
};
use bytes::Bytes;
use std::sync::{Arc, Mutex, Weak};

/// Input plugin fed by stream packets from the peer's mesh output.
///
/// `prepare` registers the plugin as listener of its receiver data session
/// and creates the session server. Inbound packets are rebuilt into buffers
/// and queued; the drain worker hands them to the data callback.
pub struct MeshChannelInput {
    core: PluginCore,
    channel: Arc<ChannelAdapter>,
    config: Arc<TransportConfig>,
    drain: Drain,
    session: Mutex<Option<SessionIdentity>>,
    this: Weak<MeshChannelInput>,
}

impl MeshChannelInput {
    /// Create a plugin handling `media_type` buffers.
    pub fn new(name: &str, media_type: MediaType, ctx: &PluginContext) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: PluginCore::new(name, PluginKind::Input, media_type),
            channel: Arc::clone(&ctx.channel),
            config: Arc::clone(&ctx.config),
            drain: Drain::new(name, &ctx.config),
            session: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub(crate) fn factory(desc: &PluginDescriptor, ctx: &PluginContext) -> Arc<dyn AvTransPlugin> {
        Self::new(&desc.name, descriptor_media_type(desc), ctx)
    }

    /// Session this plugin listens on, once prepared.
    pub fn session_name(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.session_name.clone())
    }

    fn release(&self) {
        self.drain.destroy();
        let identity = self.session.lock().unwrap().take();
        if let Some(identity) = identity {
            self.channel
                .unregister_channel_listener(&identity.session_name, &identity.peer_dev_id);
            if let Err(err) = self.channel.remove_channel_server(&identity.session_name) {
                tracing::debug!(plugin = %self.core.name(), error = %err, "server already removed");
            }
        }
    }
}

impl AvTransPlugin for MeshChannelInput {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> PluginKind {
        self.core.kind()
    }

    fn media_type(&self) -> MediaType {
        self.core.media_type()
    }

    fn state(&self) -> PluginState {
        self.core.state()
    }

    fn init(&self) -> PluginResult {
        self.core.transition(PluginState::Initialized)
    }

    fn deinit(&self) -> PluginResult {
        self.release();
        self.core.clear();
        self.core.force_state(PluginState::Created);
        Ok(())
    }

    fn prepare(&self) -> PluginResult {
        self.core.expect(&[PluginState::Initialized])?;
        let identity =
            SessionIdentity::from_params(&self.core, &self.config.receiver_data_session_suffix)?;

        let listener: Weak<dyn ChannelListener> = self.this.clone();
        if let Err(err) = self.channel.register_channel_listener(
            &identity.session_name,
            &identity.peer_dev_id,
            listener,
        ) {
            tracing::error!(plugin = %self.core.name(), error = %err, "listener registration failed");
            return Err(PluginError::InvalidOperation);
        }
        if let Err(err) = self.channel.create_channel_server(&identity.session_name) {
            tracing::error!(plugin = %self.core.name(), error = %err, "server creation failed");
            self.channel
                .unregister_channel_listener(&identity.session_name, &identity.peer_dev_id);
            return Err(PluginError::InvalidOperation);
        }

        tracing::info!(
            plugin = %self.core.name(),
            owner = %identity.owner_name,
            session = %identity.session_name,
            "mesh input prepared"
        );
        *self.session.lock().unwrap() = Some(identity);
        self.drain.create_worker(self.core.name());
        self.core.transition(PluginState::Prepared)
    }

    fn reset(&self) -> PluginResult {
        self.release();
        self.core.clear();
        self.core.force_state(PluginState::Initialized);
        Ok(())
    }

    fn start(&self) -> PluginResult {
        self.core.expect(&[PluginState::Prepared])?;
        let slot = self.core.data_slot();
        let name = self.core.name().to_string();
        self.drain.start(move |buffer| {
            if !slot.deliver(buffer) {
                tracing::debug!(plugin = %name, "no data callback, buffer dropped");
            }
        })?;
        self.core.transition(PluginState::Running)
    }

    fn stop(&self) -> PluginResult {
        self.core.expect(&[PluginState::Running])?;
        self.drain.stop();
        self.core.transition(PluginState::Prepared)
    }

    fn get_parameter(&self, tag: Tag) -> PluginResult<ParamValue> {
        self.core.get_parameter(tag)
    }

    fn set_parameter(&self, tag: Tag, value: ParamValue) -> PluginResult {
        self.core.set_parameter(tag, value)
    }

    fn push_data(&self, _in_port: &str, buffer: Option<AvTransBuffer>, _offset: i64) -> PluginResult {
        let buffer = accept_buffer(&self.core, buffer)?;
        self.drain.push(buffer);
        Ok(())
    }

    fn set_callback(&self, callback: Option<Arc<dyn PluginCallback>>) -> PluginResult {
        self.core.set_callback(callback)
    }

    fn set_data_callback(&self, callback: DataCallback) -> PluginResult {
        self.core.set_data_callback(callback)
    }
}

impl ChannelListener for MeshChannelInput {
    fn on_channel_event(&self, event: &AvTransEvent) {
        match plugin_event(event) {
            Some(event) => self.core.emit(event),
            None => {
                tracing::debug!(plugin = %self.core.name(), event = ?event.event_type, "ignored channel event")
            }
        }
    }

    fn on_stream_received(&self, data: &Bytes, ext: &Bytes) {
        if self.core.state() != PluginState::Running {
            tracing::debug!(plugin = %self.core.name(), "not running, packet discarded");
            record_packet_discarded(self.core.name());
            return;
        }
        let buffer = match buffer_from_stream(data, ext) {
            Ok(buffer) => buffer,
            Err(err) => {
                tracing::warn!(plugin = %self.core.name(), error = %err, "malformed stream packet");
                record_packet_discarded(self.core.name());
                return;
            }
        };
        if buffer.media_type() != self.core.media_type() {
            tracing::warn!(plugin = %self.core.name(), got = ?buffer.media_type(), "unexpected media type");
            record_packet_discarded(self.core.name());
            return;
        }
        tracing::trace!(
            plugin = %self.core.name(),
            pts = buffer.meta().pts(),
            frame = buffer.meta().frame_num(),
            len = buffer.len(),
            "packet received"
        );
        record_packet_received(self.core.name());
        self.drain.push(buffer);
    }
}

impl std::fmt::Debug for MeshChannelInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshChannelInput")
            .field("core", &self.core)
            .field("session", &self.session_name())
            .finish()
    }
}
