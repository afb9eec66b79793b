//! End-to-end engine tests over the loopback mesh.
//!
//! Device A runs the sender, device B the receiver. Both use the same owner
//! name, as the two halves of one distributed device do.

mod common;

use avtrans::control_center::ControlCenter;
use avtrans::filter::FilterState;
use avtrans::pipeline::PipelineState;
use avtrans::prelude::*;
use common::{DEV_A, DEV_B, Device, Recorder, init_tracing, wait_until};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn peers(id: &str) -> Vec<String> {
    vec![id.to_string()]
}

fn video_frame(len: usize) -> AvTransBuffer {
    AvTransBuffer::with_data(MediaType::Video, vec![0x5au8; len])
}

#[test]
fn test_initialize_moves_to_initialized() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    assert_eq!(sender.state(), StateId::Idle);
    sender.initialize().unwrap();
    assert_eq!(sender.state(), StateId::Initialized);
    assert_eq!(sender.session_name(), "ohos.dhardware.dscreen_avtrans.control.sender");
    assert_eq!(sender.filters().len(), 3);
    assert_eq!(sender.initialize(), Err(EngineError::InitFailed));

    let unknown = AvSenderEngine::new(a.ctx.clone(), "001", DEV_B);
    assert_eq!(unknown.initialize(), Err(EngineError::InitFailed));
    assert_eq!(unknown.state(), StateId::Idle);

    let audio = AvReceiverEngine::new(a.ctx.clone(), OWNER_NAME_D_SPEAKER, DEV_B);
    audio.initialize().unwrap();
    assert_eq!(audio.filters().len(), 2);
}

#[test]
fn test_control_channel_opens() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);
    let b = Device::new(&bus, DEV_B);

    let receiver = AvReceiverEngine::new(b.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_A);
    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    let events = Recorder::new();
    sender.register_sender_callback(events.handle()).unwrap();
    receiver.initialize().unwrap();
    sender.initialize().unwrap();

    sender
        .create_control_channel(&peers(DEV_B), ChannelAttribute::default())
        .unwrap();
    wait_until("sender channel", || sender.state() == StateId::ChCreated);
    wait_until("receiver channel", || receiver.state() == StateId::ChCreated);
    assert!(events.saw(EventType::ChannelOpened));
}

#[test]
fn test_control_channel_errors() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);
    let b = Device::new(&bus, DEV_B);

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    assert_eq!(
        sender.create_control_channel(&[], ChannelAttribute::default()),
        Err(EngineError::NullPointer)
    );
    assert_eq!(
        sender.create_control_channel(&peers(DEV_B), ChannelAttribute::default()),
        Err(EngineError::CreateChannelFailed)
    );

    let events = Recorder::new();
    sender.register_sender_callback(events.handle()).unwrap();
    sender.initialize().unwrap();
    b.transport.set_reject_opens(true);
    sender
        .create_control_channel(&peers(DEV_B), ChannelAttribute::default())
        .unwrap();
    wait_until("open failure", || events.saw(EventType::ChannelOpenFail));
    assert_eq!(sender.state(), StateId::Initialized);

    let mixed = vec![String::new(), DEV_B.to_string()];
    assert_eq!(
        sender.create_control_channel(&mixed, ChannelAttribute::default()),
        Err(EngineError::CreateChannelFailed)
    );
}

#[test]
fn test_start_and_stop() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);
    let b = Device::new(&bus, DEV_B);

    let receiver = AvReceiverEngine::new(b.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_A);
    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    receiver.initialize().unwrap();
    sender.initialize().unwrap();
    assert_eq!(sender.start(), Err(EngineError::StartFailed));
    assert_eq!(sender.stop(), Err(EngineError::StopFailed));

    sender
        .create_control_channel(&peers(DEV_B), ChannelAttribute::default())
        .unwrap();
    wait_until("sender channel", || sender.state() == StateId::ChCreated);

    sender.start().unwrap();
    assert_eq!(sender.state(), StateId::Started);
    assert_eq!(sender.pipeline_state(), Some(PipelineState::Running));
    assert!(sender.filters().iter().all(|f| f.state() == FilterState::Running));

    sender.stop().unwrap();
    assert_eq!(sender.state(), StateId::Initialized);
    assert_eq!(sender.pipeline_state(), Some(PipelineState::Created));
    assert!(sender.filters().iter().all(|f| f.state() == FilterState::Initialized));
    assert_eq!(sender.stop(), Err(EngineError::StopFailed));
}

#[test]
fn test_set_parameter() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    assert_eq!(
        sender.set_parameter(AvTransTag::VideoWidth, "123"),
        Err(EngineError::SetupFailed)
    );
    sender.initialize().unwrap();

    sender.set_parameter(AvTransTag::VideoWidth, "123").unwrap();
    assert_eq!(
        sender.set_parameter(AvTransTag::VideoWidth, "abc"),
        Err(EngineError::InvalidParam)
    );
    assert_eq!(
        sender.set_parameter(AvTransTag::Invalid, "1"),
        Err(EngineError::SetupFailed)
    );
    assert_eq!(
        sender.set_parameter(AvTransTag::AudioCodecType, mime::AUDIO_RAW),
        Err(EngineError::InvalidParam)
    );
    for filter in sender.filters() {
        assert_eq!(
            filter.get_parameter(avtrans::plugin::Tag::VideoWidth),
            Ok(avtrans::plugin::ParamValue::Int(123))
        );
    }
}

#[test]
fn test_prepare_pipeline_config() {
    init_tracing();
    let bus = LoopbackBus::new();
    let b = Device::new(&bus, DEV_B);

    let receiver = AvReceiverEngine::new(b.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_A);
    assert_eq!(receiver.prepare_pipeline(""), Err(EngineError::PrepareFailed));
    receiver.initialize().unwrap();

    assert_eq!(receiver.prepare_pipeline("{not json"), Err(EngineError::PrepareFailed));
    assert_eq!(
        receiver.prepare_pipeline(r#"{"video_depth": 8}"#),
        Err(EngineError::PrepareFailed)
    );
    receiver
        .prepare_pipeline(r#"{"video_width": 1280, "video_height": "720", "video_codec_type": "video/avc"}"#)
        .unwrap();
    assert_eq!(receiver.pipeline_state(), Some(PipelineState::Ready));
}

#[test]
fn test_video_stream_and_channel_close() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);
    let b = Device::new(&bus, DEV_B);

    let receiver = AvReceiverEngine::new(b.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_A);
    let received = Recorder::new();
    receiver.register_receiver_callback(received.handle()).unwrap();
    receiver.initialize().unwrap();
    receiver.prepare_pipeline(r#"{"video_frame_rate": 120}"#).unwrap();

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    let sent = Recorder::new();
    sender.register_sender_callback(sent.handle()).unwrap();
    sender.initialize().unwrap();
    sender.set_parameter(AvTransTag::VideoWidth, "640").unwrap();
    sender.set_parameter(AvTransTag::VideoHeight, "480").unwrap();
    assert_eq!(sender.push_data(video_frame(16)), Err(EngineError::PushDataFailed));

    sender
        .create_control_channel(&peers(DEV_B), ChannelAttribute::default())
        .unwrap();
    wait_until("receiver channel", || receiver.state() == StateId::ChCreated);
    wait_until("sender channel", || sender.state() == StateId::ChCreated);
    receiver.start().unwrap();
    sender.start().unwrap();
    wait_until("data channel", || sent.saw(EventType::StartSuccess));

    for _ in 0..3 {
        sender.push_data(video_frame(256)).unwrap();
    }
    wait_until("frames", || received.buffer_count() == 3);
    {
        let buffers = received.buffers.lock().unwrap();
        let BufferMeta::Video(meta) = buffers[0].meta() else {
            panic!("expected video meta");
        };
        assert_eq!((meta.width, meta.height), (640, 480));
        assert_eq!(meta.frame_num, 1);
        assert_eq!(buffers[2].len(), 256);
    }

    // Losing the control channel stops the receiver.
    sender.release().unwrap();
    assert_eq!(sender.state(), StateId::Idle);
    wait_until("receiver fallback", || {
        receiver.state() == StateId::Initialized
            && receiver.pipeline_state() == Some(PipelineState::Created)
    });
    assert!(received.saw(EventType::ChannelClosed));

    let delivered = received.buffer_count();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(received.buffer_count(), delivered);
}

#[test]
fn test_audio_stream_keeps_format() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);
    let b = Device::new(&bus, DEV_B);
    let config = r#"{"audio_sample_rate": 48000, "audio_channel_mask": 2, "audio_sample_format": 1}"#;

    let receiver = AvReceiverEngine::new(b.ctx.clone(), OWNER_NAME_D_MIC, DEV_A);
    let received = Recorder::new();
    receiver.register_receiver_callback(received.handle()).unwrap();
    receiver.initialize().unwrap();
    receiver.prepare_pipeline(config).unwrap();

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_MIC, DEV_B);
    let sent = Recorder::new();
    sender.register_sender_callback(sent.handle()).unwrap();
    sender.initialize().unwrap();
    sender.prepare_pipeline(config).unwrap();

    sender
        .create_control_channel(&peers(DEV_B), ChannelAttribute::default())
        .unwrap();
    wait_until("receiver channel", || receiver.state() == StateId::ChCreated);
    wait_until("sender channel", || sender.state() == StateId::ChCreated);
    receiver.start().unwrap();
    sender.start().unwrap();
    wait_until("data channel", || sent.saw(EventType::StartSuccess));

    sender
        .push_data(AvTransBuffer::with_data(MediaType::Audio, vec![1u8; 1920]))
        .unwrap();
    wait_until("audio frame", || received.buffer_count() == 1);

    let buffers = received.buffers.lock().unwrap();
    let BufferMeta::Audio(meta) = buffers[0].meta() else {
        panic!("expected audio meta");
    };
    assert_eq!(meta.sample_rate, 48000);
    assert_eq!(meta.channels, 2);
    assert_eq!(meta.frame_num, 1);
}

#[test]
fn test_control_messages() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);
    let b = Device::new(&bus, DEV_B);

    let receiver = AvReceiverEngine::new(b.ctx.clone(), OWNER_NAME_D_CAMERA, DEV_A);
    let inbox = Recorder::new();
    receiver.register_receiver_callback(inbox.handle()).unwrap();
    assert_eq!(receiver.register_receiver_callback(None), Err(EngineError::InvalidParam));
    receiver.initialize().unwrap();

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_CAMERA, DEV_B);
    sender.initialize().unwrap();
    let message = AvTransMessage::new(7, r#"{"sync":true}"#, "");
    assert_eq!(sender.send_message(None), Err(EngineError::InvalidParam));
    assert_eq!(
        sender.send_message(Some(&AvTransMessage::new(7, "", ""))),
        Err(EngineError::InvalidParam)
    );
    assert_eq!(sender.send_message(Some(&message)), Err(EngineError::SendDataFailed));

    sender
        .create_control_channel(&peers(DEV_B), ChannelAttribute::default())
        .unwrap();
    wait_until("sender channel", || sender.state() == StateId::ChCreated);
    sender.send_message(Some(&message)).unwrap();
    wait_until("message", || !inbox.messages.lock().unwrap().is_empty());
    assert_eq!(inbox.messages.lock().unwrap()[0], message);
}

#[test]
fn test_control_center_relays_events() {
    init_tracing();
    let bus = LoopbackBus::new();
    let center = LocalControlCenter::new();
    let kit = Arc::new(ControlCenterKit::new(center.clone()));
    let a = Device::new(&bus, DEV_A).with_control_center(Arc::clone(&kit));

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_MIC, DEV_B);
    let receiver = AvReceiverEngine::new(a.ctx.clone(), OWNER_NAME_D_SPEAKER, DEV_B);
    let receiver_events = Recorder::new();
    receiver.register_receiver_callback(receiver_events.handle()).unwrap();
    sender.initialize().unwrap();
    receiver.initialize().unwrap();
    assert_eq!(center.engine_count(), 2);

    let sender_id = sender.engine_id().unwrap();
    let event = AvTransEvent::new(EventType::StartSuccess, "clock ready", DEV_B);
    sender.notify_control_center(&event).unwrap();
    assert_eq!(*receiver_events.events.lock().unwrap(), [event]);

    let receiver_id = receiver.engine_id().unwrap();
    center.release(receiver_id).unwrap();
    assert_eq!(center.release(receiver_id), Err(EngineError::EngineNotFound));
    sender.release().unwrap();
    assert_eq!(center.engine_count(), 0);
    let late = AvTransEvent::new(EventType::Unknown, "", "");
    assert_eq!(center.notify(sender_id, &late), Err(EngineError::EngineNotFound));
}

#[test]
fn test_stream_change_events() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    assert_eq!(sender.notify_stream_change(EventType::AddStream), Ok(()));

    let events = Recorder::new();
    sender.register_sender_callback(events.handle()).unwrap();
    sender.notify_stream_change(EventType::AddStream).unwrap();
    sender.notify_stream_change(EventType::RemoveStream).unwrap();
    assert_eq!(
        sender.notify_stream_change(EventType::ChannelOpened),
        Err(EngineError::InvalidParam)
    );

    let seen = events.events.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            AvTransEvent::new(EventType::AddStream, OWNER_NAME_D_SCREEN, DEV_B),
            AvTransEvent::new(EventType::RemoveStream, OWNER_NAME_D_SCREEN, DEV_B),
        ]
    );

    let receiver = AvReceiverEngine::new(a.ctx.clone(), OWNER_NAME_D_MIC, DEV_B);
    let inbox = Recorder::new();
    receiver.register_receiver_callback(inbox.handle()).unwrap();
    receiver.notify_stream_change(EventType::RemoveStream).unwrap();
    assert_eq!(
        receiver.notify_stream_change(EventType::DataReceived),
        Err(EngineError::InvalidParam)
    );
    assert!(inbox.saw(EventType::RemoveStream));
    assert_eq!(inbox.events.lock().unwrap()[0].content, OWNER_NAME_D_MIC);
}

/// Callback that takes a while to consume each buffer.
#[derive(Default)]
struct SlowSink {
    consumed: AtomicUsize,
}

impl EngineCallback for SlowSink {
    fn on_event(&self, _event: &AvTransEvent) {}

    fn on_message(&self, _message: &AvTransMessage) {}

    fn on_data_available(&self, _buffer: AvTransBuffer) {
        std::thread::sleep(Duration::from_millis(20));
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_stop_waits_for_inflight_delivery() {
    init_tracing();
    let bus = LoopbackBus::new();
    let a = Device::new(&bus, DEV_A);
    let b = Device::new(&bus, DEV_B);

    let receiver = AvReceiverEngine::new(b.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_A);
    let sink = Arc::new(SlowSink::default());
    let callback: Arc<dyn EngineCallback> = sink.clone();
    receiver.register_receiver_callback(Some(callback)).unwrap();
    receiver.initialize().unwrap();

    let sender = AvSenderEngine::new(a.ctx.clone(), OWNER_NAME_D_SCREEN, DEV_B);
    let sent = Recorder::new();
    sender.register_sender_callback(sent.handle()).unwrap();
    sender.initialize().unwrap();
    sender
        .create_control_channel(&peers(DEV_B), ChannelAttribute::default())
        .unwrap();
    wait_until("receiver channel", || receiver.state() == StateId::ChCreated);
    wait_until("sender channel", || sender.state() == StateId::ChCreated);
    receiver.start().unwrap();
    sender.start().unwrap();
    wait_until("data channel", || sent.saw(EventType::StartSuccess));

    for _ in 0..5 {
        sender.push_data(video_frame(64)).unwrap();
    }
    wait_until("first frame", || sink.consumed.load(Ordering::SeqCst) > 0);

    receiver.stop().unwrap();
    let consumed = sink.consumed.load(Ordering::SeqCst);
    sender.push_data(video_frame(64)).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.consumed.load(Ordering::SeqCst), consumed);
}
