//! Plugin lifecycle tests through the public plugin contract.

mod common;

use avtrans::buffer::AvTransBuffer;
use avtrans::channel::{ChannelAdapter, ChannelDescription, LoopbackBus};
use avtrans::config::TransportConfig;
use avtrans::error::PluginError;
use avtrans::format::{MediaType, mime};
use avtrans::plugin::{
    AvTransPlugin, BufferQueue, ParamValue, PluginContext, PluginKind, PluginRegistry,
    PluginState, Tag,
};
use avtrans::plugins::{LocalScreenInput, MeshChannelOutput, PASSTHROUGH_CODEC, register_builtin};
use common::{DEV_A, DEV_B, init_tracing};
use std::sync::{Arc, Mutex};

fn frame() -> AvTransBuffer {
    AvTransBuffer::with_data(MediaType::Video, vec![7u8; 32])
}

#[test]
fn test_plugin_state_sequence() {
    init_tracing();
    let plugin = LocalScreenInput::new("local_screen_service_input", MediaType::Video);
    let seen = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    plugin
        .set_data_callback(Arc::new(move |_| *counter.lock().unwrap() += 1))
        .unwrap();

    assert_eq!(plugin.state(), PluginState::Created);
    assert_eq!(plugin.prepare(), Err(PluginError::WrongState));
    plugin.init().unwrap();
    assert_eq!(plugin.state(), PluginState::Initialized);
    plugin
        .set_parameter(Tag::VideoWidth, ParamValue::Int(320))
        .unwrap();
    plugin.prepare().unwrap();
    assert_eq!(plugin.state(), PluginState::Prepared);
    plugin.start().unwrap();
    assert_eq!(plugin.state(), PluginState::Running);

    assert_eq!(
        plugin.set_parameter(Tag::VideoHeight, ParamValue::Int(240)),
        Err(PluginError::WrongState)
    );
    plugin.push_data("in", Some(frame()), 0).unwrap();

    plugin.pause().unwrap();
    assert_eq!(plugin.state(), PluginState::Paused);
    plugin.push_data("in", Some(frame()), 0).unwrap();
    plugin.resume().unwrap();
    assert_eq!(plugin.state(), PluginState::Running);
    assert_eq!(*seen.lock().unwrap(), 1);

    plugin.stop().unwrap();
    assert_eq!(plugin.state(), PluginState::Prepared);
    assert_eq!(plugin.stop(), Err(PluginError::WrongState));
    plugin.reset().unwrap();
    assert_eq!(plugin.state(), PluginState::Initialized);
    plugin.deinit().unwrap();
    assert_eq!(plugin.state(), PluginState::Created);
}

#[test]
fn test_push_data_rejects_bad_buffers() {
    let plugin = LocalScreenInput::new("local_screen_service_input", MediaType::Video);
    plugin.init().unwrap();
    plugin.prepare().unwrap();
    plugin.start().unwrap();

    assert_eq!(plugin.push_data("in", None, 0), Err(PluginError::NullPointer));
    let audio = AvTransBuffer::with_data(MediaType::Audio, vec![1u8; 4]);
    assert_eq!(
        plugin.push_data("in", Some(audio), 0),
        Err(PluginError::InvalidParameter)
    );
    assert_eq!(
        plugin.push_data("in", Some(AvTransBuffer::new(MediaType::Video)), 0),
        Err(PluginError::InvalidParameter)
    );
}

#[test]
fn test_mesh_output_binds_data_session() {
    init_tracing();
    let bus = LoopbackBus::new();
    let config = Arc::new(TransportConfig::default());
    let channel = ChannelAdapter::new(bus.endpoint(DEV_A), &config);
    let ctx = PluginContext {
        channel: Arc::clone(&channel),
        config,
    };
    let plugin = MeshChannelOutput::new("mesh_channel_output", MediaType::Video, &ctx);
    plugin.init().unwrap();
    assert_eq!(plugin.prepare(), Err(PluginError::NullPointer));

    let description = ChannelDescription::new("ohos.dhardware.dscreen", DEV_B).marshal();
    plugin
        .set_parameter(Tag::MediaDescription, ParamValue::Str(description))
        .unwrap();
    plugin
        .set_parameter(Tag::MediaTitle, ParamValue::Str("video".into()))
        .unwrap();
    plugin.prepare().unwrap();

    let session = "ohos.dhardware.dscreen_video_avtrans.sender.data";
    assert_eq!(plugin.session_name().as_deref(), Some(session));
    assert!(channel.has_listener(session, DEV_B));

    plugin.deinit().unwrap();
    assert_eq!(plugin.state(), PluginState::Created);
    assert!(!channel.has_listener(session, DEV_B));
}

#[test]
fn test_registry_orders_candidates() {
    let registry = PluginRegistry::new();
    register_builtin(&registry);

    let codecs = registry.candidates(PluginKind::Codec, mime::VIDEO_H264);
    assert_eq!(codecs.len(), 1);
    assert_eq!(codecs[0].name, PASSTHROUGH_CODEC);
    assert!(registry.candidates(PluginKind::Codec, "video/unknown").is_empty());
}

#[test]
fn test_queue_never_exceeds_capacity() {
    let queue = BufferQueue::new("bounded", 3);
    for _ in 0..10 {
        queue.push(frame());
    }
    let stats = queue.stats();
    assert_eq!(stats.current_buffers, 3);
    assert_eq!(stats.total_pushed, 10);
    assert_eq!(stats.total_dropped, 7);
}
