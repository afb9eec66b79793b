//! Built-in plugins.
//!
//! | Name | Kind | Role |
//! |------|------|------|
//! | `mesh_channel_input` | Input | Receives packets from the data channel |
//! | `local_audio_service_input` | Input | Accepts audio frames from the local audio service |
//! | `local_screen_service_input` | Input | Accepts frames from the local screen service |
//! | `passthrough_codec` | Codec | Forwards buffers unchanged |
//! | `mesh_channel_output` | Output | Sends packets over the data channel |
//! | `local_audio_service_output` | Output | Hands audio to the local audio service |
//! | `local_screen_service_output` | Output | Hands paced frames to the local screen service |
//!
//! [`register_builtin`] adds them all to a [`PluginRegistry`].

mod codec;
mod local_audio;
mod local_screen;
mod mesh_input;
mod mesh_output;

pub use codec::PassthroughCodec;
pub use local_audio::{LocalAudioInput, LocalAudioOutput};
pub use local_screen::{LocalScreenInput, LocalScreenOutput};
pub use mesh_input::MeshChannelInput;
pub use mesh_output::MeshChannelOutput;

use crate::buffer::AvTransBuffer;
use crate::channel::ChannelDescription;
use crate::config::TransportConfig;
use crate::error::{MetaError, PluginError, PluginResult};
use crate::event::{AvTransEvent, EventType};
use crate::format::{Capability, MediaType, VideoPixelFormat, mime};
use crate::memory::{AvTransSharedMemory, SharedClock};
use crate::metadata::BufferMeta;
use crate::plugin::{
    BufferQueue, DrainWorker, PluginCore, PluginDescriptor, PluginEvent, PluginEventType,
    PluginFactory, PluginKind, PluginRegistry, Tag,
};
use crate::util::{parse_object, require_str, require_u32};
use bytes::Bytes;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Name of the mesh channel input plugin.
pub const MESH_CHANNEL_INPUT: &str = "mesh_channel_input";
/// Name of the local audio service input plugin.
pub const LOCAL_AUDIO_SERVICE_INPUT: &str = "local_audio_service_input";
/// Name of the local screen service input plugin.
pub const LOCAL_SCREEN_SERVICE_INPUT: &str = "local_screen_service_input";
/// Name of the passthrough codec plugin.
pub const PASSTHROUGH_CODEC: &str = "passthrough_codec";
/// Name of the mesh channel output plugin.
pub const MESH_CHANNEL_OUTPUT: &str = "mesh_channel_output";
/// Name of the local audio service output plugin.
pub const LOCAL_AUDIO_SERVICE_OUTPUT: &str = "local_audio_service_output";
/// Name of the local screen service output plugin.
pub const LOCAL_SCREEN_SERVICE_OUTPUT: &str = "local_screen_service_output";

/// Side-channel key carrying the media type code of a stream packet.
pub const KEY_DATA_META_TYPE: &str = "avtrans_data_meta_type";
/// Side-channel key carrying the marshalled buffer meta.
pub const KEY_DATA_PARAM: &str = "avtrans_data_param";

const MAX_META_LEN: usize = 4096;

fn mesh_caps() -> Vec<Capability> {
    vec![
        Capability::new(mime::VIDEO_H264),
        Capability::new(mime::VIDEO_H265),
        Capability::new(mime::AUDIO_RAW),
        Capability::new(mime::AUDIO_AAC),
    ]
}

fn raw_audio_cap() -> Capability {
    Capability::new(mime::AUDIO_RAW)
        .with_sample_rates([8000, 11025, 16000, 22050, 32000, 44100, 48000, 64000, 96000])
        .with_channels(1, 2)
}

fn screen_caps() -> Vec<Capability> {
    vec![
        Capability::new(mime::VIDEO_RAW).with_pixel_formats([VideoPixelFormat::Rgba]),
        Capability::new(mime::VIDEO_H264),
        Capability::new(mime::VIDEO_H265),
    ]
}

/// One descriptor per capability, so each is indexed under its own MIME.
fn per_mime(
    name: &str,
    kind: PluginKind,
    caps: Vec<Capability>,
    factory: PluginFactory,
) -> Vec<PluginDescriptor> {
    caps.into_iter()
        .map(|cap| {
            let (in_caps, out_caps) = match kind {
                PluginKind::Input => (Vec::new(), vec![cap]),
                PluginKind::Codec => (vec![cap.clone()], vec![cap]),
                PluginKind::Output => (vec![cap], Vec::new()),
            };
            PluginDescriptor {
                name: name.to_string(),
                kind,
                in_caps,
                out_caps,
                factory,
            }
        })
        .collect()
}

/// Register every built-in plugin. Returns the number of descriptors added.
pub fn register_builtin(registry: &PluginRegistry) -> usize {
    let mut descriptors = Vec::new();
    descriptors.extend(per_mime(
        MESH_CHANNEL_INPUT,
        PluginKind::Input,
        mesh_caps(),
        MeshChannelInput::factory,
    ));
    descriptors.extend(per_mime(
        LOCAL_AUDIO_SERVICE_INPUT,
        PluginKind::Input,
        vec![raw_audio_cap()],
        LocalAudioInput::factory,
    ));
    descriptors.extend(per_mime(
        LOCAL_SCREEN_SERVICE_INPUT,
        PluginKind::Input,
        screen_caps(),
        LocalScreenInput::factory,
    ));

    let mut codec_caps = mesh_caps();
    codec_caps.push(Capability::new(mime::VIDEO_RAW));
    descriptors.extend(per_mime(
        PASSTHROUGH_CODEC,
        PluginKind::Codec,
        codec_caps,
        PassthroughCodec::factory,
    ));

    descriptors.extend(per_mime(
        MESH_CHANNEL_OUTPUT,
        PluginKind::Output,
        mesh_caps(),
        MeshChannelOutput::factory,
    ));
    descriptors.extend(per_mime(
        LOCAL_AUDIO_SERVICE_OUTPUT,
        PluginKind::Output,
        vec![Capability::new(mime::AUDIO_RAW), Capability::new(mime::AUDIO_AAC)],
        LocalAudioOutput::factory,
    ));
    descriptors.extend(per_mime(
        LOCAL_SCREEN_SERVICE_OUTPUT,
        PluginKind::Output,
        screen_caps(),
        LocalScreenOutput::factory,
    ));

    descriptors
        .into_iter()
        .filter(|descriptor| registry.register(descriptor.clone()))
        .count()
}

/// Media type a descriptor handles, defaulting to video.
fn descriptor_media_type(descriptor: &PluginDescriptor) -> MediaType {
    descriptor.media_type().unwrap_or(MediaType::Video)
}

/// Validate a pushed buffer against the plugin's media type.
fn accept_buffer(core: &PluginCore, buffer: Option<AvTransBuffer>) -> PluginResult<AvTransBuffer> {
    let buffer = buffer.ok_or(PluginError::NullPointer)?;
    if buffer.media_type() != core.media_type() {
        tracing::debug!(
            plugin = %core.name(),
            expected = ?core.media_type(),
            got = ?buffer.media_type(),
            "buffer meta type mismatch"
        );
        return Err(PluginError::InvalidParameter);
    }
    Ok(buffer)
}

/// Owner, peer and session name of a channel-backed plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionIdentity {
    owner_name: String,
    peer_dev_id: String,
    session_name: String,
}

impl SessionIdentity {
    /// Build from `MediaDescription` and `MediaTitle`:
    /// `<owner>_<title><suffix>`.
    fn from_params(core: &PluginCore, suffix: &str) -> PluginResult<Self> {
        let description = core
            .param_str(Tag::MediaDescription)
            .ok_or(PluginError::NullPointer)?;
        let desc = ChannelDescription::parse(&description).map_err(|err| {
            tracing::warn!(plugin = %core.name(), error = %err, "bad channel description");
            PluginError::InvalidParameter
        })?;
        if desc.owner_name.is_empty() || desc.peer_dev_id.is_empty() {
            return Err(PluginError::InvalidParameter);
        }
        let title = core.param_str(Tag::MediaTitle).unwrap_or_default();
        Ok(Self {
            session_name: format!("{}_{}{}", desc.owner_name, title, suffix),
            owner_name: desc.owner_name,
            peer_dev_id: desc.peer_dev_id,
        })
    }
}

/// Plugin event for a data-channel event, if it is one plugins report.
fn plugin_event(event: &AvTransEvent) -> Option<PluginEvent> {
    let event_type = match event.event_type {
        EventType::ChannelOpened => PluginEventType::ChannelOpened,
        EventType::ChannelOpenFail => PluginEventType::ChannelOpenFail,
        EventType::ChannelClosed => PluginEventType::ChannelClosed,
        _ => return None,
    };
    Some(PluginEvent {
        event_type,
        description: event.content.clone(),
        peer_dev_id: event.peer_dev_id.clone(),
    })
}

/// Side-channel JSON accompanying a stream packet.
fn stream_ext(buffer: &AvTransBuffer) -> String {
    json!({
        KEY_DATA_META_TYPE: buffer.media_type().code(),
        KEY_DATA_PARAM: buffer.meta().marshal(),
    })
    .to_string()
}

/// Rebuild a buffer from a stream packet and its side-channel JSON.
fn buffer_from_stream(data: &Bytes, ext: &Bytes) -> Result<AvTransBuffer, MetaError> {
    let text = std::str::from_utf8(ext).map_err(|e| MetaError::Malformed(e.to_string()))?;
    let obj = parse_object(text)?;
    let media_type = MediaType::from_code(require_u32(&obj, KEY_DATA_META_TYPE)?)
        .ok_or(MetaError::InvalidField(KEY_DATA_META_TYPE))?;
    let meta = BufferMeta::unmarshal(media_type, require_str(&obj, KEY_DATA_PARAM, MAX_META_LEN)?)?;
    let mut buffer = AvTransBuffer::from_meta(meta);
    buffer.append(data.clone());
    Ok(buffer)
}

/// Queue and drain worker of a queued plugin.
///
/// The worker lock doubles as the lifecycle lock of the drain path: `stop`
/// holds it while joining, and drain handlers never take it.
struct Drain {
    queue: Arc<BufferQueue>,
    worker: Mutex<Option<DrainWorker>>,
    wait: Duration,
}

impl Drain {
    fn new(name: &str, config: &TransportConfig) -> Self {
        Self {
            queue: Arc::new(BufferQueue::new(name, config.queue_capacity)),
            worker: Mutex::new(None),
            wait: config.drain_wait(),
        }
    }

    /// Create the worker without starting it.
    fn create_worker(&self, name: &str) {
        let worker = DrainWorker::new(format!("{name}-drain"), Arc::clone(&self.queue), self.wait);
        *self.worker.lock().unwrap() = Some(worker);
    }

    /// Drop stale buffers and start draining into `handler`.
    fn start<F>(&self, handler: F) -> PluginResult
    where
        F: FnMut(AvTransBuffer) + Send + 'static,
    {
        let mut guard = self.worker.lock().unwrap();
        let worker = guard.as_mut().ok_or(PluginError::NullPointer)?;
        self.queue.clear();
        worker.start(handler)
    }

    /// Stop draining and drop queued buffers.
    fn stop(&self) {
        if let Some(worker) = self.worker.lock().unwrap().as_mut() {
            worker.stop();
        }
        self.queue.clear();
    }

    /// Stop and destroy the worker.
    fn destroy(&self) {
        let worker = self.worker.lock().unwrap().take();
        drop(worker);
        self.queue.clear();
    }

    fn push(&self, buffer: AvTransBuffer) {
        self.queue.push(buffer);
    }
}

/// Open the master clock named by `UserSharedMemoryFd`, if set.
fn open_clock(core: &PluginCore) -> PluginResult<Option<Arc<SharedClock>>> {
    let Some(text) = core.param_str(Tag::UserSharedMemoryFd) else {
        return Ok(None);
    };
    let descriptor = AvTransSharedMemory::unmarshal(&text).map_err(|err| {
        tracing::warn!(plugin = %core.name(), error = %err, "bad shared memory descriptor");
        PluginError::InvalidParameter
    })?;
    // SAFETY: the descriptor comes from the clock owner through the control
    // center, which keeps the region alive while engines use it. The fd is
    // duplicated before mapping.
    let clock = unsafe { SharedClock::open(&descriptor) }.map_err(|err| {
        tracing::warn!(plugin = %core.name(), error = %err, "cannot map shared clock");
        PluginError::InvalidParameter
    })?;
    tracing::debug!(plugin = %core.name(), region = %descriptor.name, "shared clock mapped");
    Ok(Some(Arc::new(clock)))
}
