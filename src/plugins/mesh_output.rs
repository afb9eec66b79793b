//! Sending end of the data channel.

use super::{Drain, SessionIdentity, accept_buffer, descriptor_media_type, plugin_event, stream_ext};
use crate::buffer::AvTransBuffer;
use crate::channel::{ChannelAdapter, ChannelListener};
use crate::config::TransportConfig;
use crate::error::{PluginError, PluginResult};
use crate::event::AvTransEvent;
use crate::format::MediaType;
use crate::observability::{record_buffer_sent, record_packet_discarded};
use crate::plugin::{
    AvTransPlugin, DataCallback, ParamValue, PluginCallback, PluginContext, PluginCore,
    PluginDescriptor, PluginKind, PluginState, Tag,
};
use crate::util::anonymize;
use bytes::Bytes;
use std::sync::{Arc, Mutex, Weak};

/// Output plugin that ships buffers to the peer's mesh input.
///
/// `start` opens the sender data session towards the peer; the outcome is
/// reported to the callback as a channel event. Buffers pushed in are queued
/// and sent by the drain worker as stream packets with side-channel meta.
pub struct MeshChannelOutput {
    core: PluginCore,
    channel: Arc<ChannelAdapter>,
    config: Arc<TransportConfig>,
    drain: Drain,
    session: Mutex<Option<SessionIdentity>>,
    this: Weak<MeshChannelOutput>,
}

impl MeshChannelOutput {
    /// Create a plugin handling `media_type` buffers.
    pub fn new(name: &str, media_type: MediaType, ctx: &PluginContext) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: PluginCore::new(name, PluginKind::Output, media_type),
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

    /// Session this plugin sends on, once prepared.
    pub fn session_name(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.session_name.clone())
    }

    fn identity(&self) -> PluginResult<SessionIdentity> {
        self.session
            .lock()
            .unwrap()
            .clone()
            .ok_or(PluginError::NullPointer)
    }

    fn release(&self) {
        self.drain.destroy();
        let identity = self.session.lock().unwrap().take();
        if let Some(identity) = identity {
            self.channel
                .close_channel(&identity.session_name, &identity.peer_dev_id);
            self.channel
                .unregister_channel_listener(&identity.session_name, &identity.peer_dev_id);
            if let Err(err) = self.channel.remove_channel_server(&identity.session_name) {
                tracing::debug!(plugin = %self.core.name(), error = %err, "server already removed");
            }
        }
    }
}

impl AvTransPlugin for MeshChannelOutput {
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
            SessionIdentity::from_params(&self.core, &self.config.sender_data_session_suffix)?;

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
            "mesh output prepared"
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
        let identity = self.identity()?;

        let channel = Arc::clone(&self.channel);
        let name = self.core.name().to_string();
        let session = identity.session_name.clone();
        let peer = identity.peer_dev_id.clone();
        self.drain.start(move |buffer| {
            let ext = stream_ext(&buffer);
            let data = buffer.contiguous();
            match channel.send_stream_data(&session, &peer, &data, ext.as_bytes()) {
                Ok(()) => record_buffer_sent(&name),
                Err(err) => {
                    tracing::debug!(plugin = %name, error = %err, "stream send failed");
                    record_packet_discarded(&name);
                }
            }
        })?;

        if let Err(err) = self
            .channel
            .create_channel(&identity.session_name, &identity.peer_dev_id)
        {
            tracing::error!(
                plugin = %self.core.name(),
                peer = %anonymize(&identity.peer_dev_id),
                error = %err,
                "cannot open data channel"
            );
            self.drain.stop();
            return Err(PluginError::InvalidOperation);
        }
        self.core.transition(PluginState::Running)
    }

    fn stop(&self) -> PluginResult {
        self.core.expect(&[PluginState::Running])?;
        self.drain.stop();
        if let Ok(identity) = self.identity() {
            self.channel
                .close_channel(&identity.session_name, &identity.peer_dev_id);
        }
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

impl ChannelListener for MeshChannelOutput {
    fn on_channel_event(&self, event: &AvTransEvent) {
        match plugin_event(event) {
            Some(event) => self.core.emit(event),
            None => {
                tracing::debug!(plugin = %self.core.name(), event = ?event.event_type, "ignored channel event")
            }
        }
    }

    fn on_stream_received(&self, _data: &Bytes, _ext: &Bytes) {
        tracing::debug!(plugin = %self.core.name(), "output plugin ignores inbound stream");
    }
}

impl std::fmt::Debug for MeshChannelOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshChannelOutput")
            .field("core", &self.core)
            .field("session", &self.session_name())
            .finish()
    }
}
