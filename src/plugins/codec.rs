//! Codec plugin that hands buffers through untouched.

use super::{accept_buffer, descriptor_media_type};
use crate::buffer::AvTransBuffer;
use crate::error::PluginResult;
use crate::format::MediaType;
use crate::plugin::{
    AvTransPlugin, DataCallback, ParamValue, PluginCallback, PluginContext, PluginCore,
    PluginDescriptor, PluginKind, PluginState, Tag,
};
use std::sync::Arc;

/// Codec that forwards every buffer unchanged, on the caller's thread.
#[derive(Debug)]
pub struct PassthroughCodec {
    core: PluginCore,
}

impl PassthroughCodec {
    /// Create a codec for `media_type` buffers.
    pub fn new(name: &str, media_type: MediaType) -> Arc<Self> {
        Arc::new(Self {
            core: PluginCore::new(name, PluginKind::Codec, media_type),
        })
    }

    pub(crate) fn factory(desc: &PluginDescriptor, _ctx: &PluginContext) -> Arc<dyn AvTransPlugin> {
        Self::new(&desc.name, descriptor_media_type(desc))
    }
}

impl AvTransPlugin for PassthroughCodec {
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
        self.core.clear();
        self.core.force_state(PluginState::Created);
        Ok(())
    }

    fn prepare(&self) -> PluginResult {
        self.core.transition(PluginState::Prepared)
    }

    fn reset(&self) -> PluginResult {
        self.core.clear();
        self.core.force_state(PluginState::Initialized);
        Ok(())
    }

    fn start(&self) -> PluginResult {
        self.core.expect(&[PluginState::Prepared])?;
        self.core.transition(PluginState::Running)
    }

    fn stop(&self) -> PluginResult {
        self.core.expect(&[PluginState::Running])?;
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
        if !self.core.data_slot().deliver(buffer) {
            tracing::debug!(plugin = %self.core.name(), "no data callback, buffer dropped");
        }
        Ok(())
    }

    fn set_callback(&self, callback: Option<Arc<dyn PluginCallback>>) -> PluginResult {
        self.core.set_callback(callback)
    }

    fn set_data_callback(&self, callback: DataCallback) -> PluginResult {
        self.core.set_data_callback(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use std::sync::Mutex;

    #[test]
    fn test_forwards_unchanged() {
        let codec = PassthroughCodec::new("passthrough_codec", MediaType::Audio);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        codec
            .set_data_callback(Arc::new(move |buffer| sink.lock().unwrap().push(buffer)))
            .unwrap();

        let buffer = AvTransBuffer::with_data(MediaType::Audio, vec![9u8; 8]);
        codec.push_data("codec", Some(buffer.clone()), 0).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), [buffer]);

        assert_eq!(codec.push_data("codec", None, 0), Err(PluginError::NullPointer));
        let video = AvTransBuffer::new(MediaType::Video);
        assert_eq!(
            codec.push_data("codec", Some(video), 0),
            Err(PluginError::InvalidParameter)
        );
    }
}
