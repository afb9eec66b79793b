//! Adapters between the pipeline and the local audio service.

use super::{Drain, accept_buffer, descriptor_media_type, open_clock};
use crate::buffer::AvTransBuffer;
use crate::error::{PluginError, PluginResult};
use crate::format::{AudioSampleFormat, MediaType};
use crate::memory::{ClockUnit, SharedClock};
use crate::plugin::{
    AvTransPlugin, DataCallback, ParamValue, PluginCallback, PluginContext, PluginCore,
    PluginDescriptor, PluginKind, PluginState, Tag,
};
use crate::util::now_ms;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Input plugin fed by the local audio service.
///
/// Every accepted frame is stamped with the wall clock in milliseconds and
/// an increasing frame number, then handed to the data callback on the
/// caller's thread.
#[derive(Debug)]
pub struct LocalAudioInput {
    core: PluginCore,
    frame_counter: AtomicU32,
}

impl LocalAudioInput {
    /// Create an audio input.
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            core: PluginCore::new(name, PluginKind::Input, MediaType::Audio),
            frame_counter: AtomicU32::new(0),
        })
    }

    pub(crate) fn factory(desc: &PluginDescriptor, _ctx: &PluginContext) -> Arc<dyn AvTransPlugin> {
        Self::new(&desc.name)
    }

    fn next_frame(&self) -> u32 {
        self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

impl AvTransPlugin for LocalAudioInput {
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
        self.frame_counter.store(0, Ordering::Relaxed);
        self.core.force_state(PluginState::Initialized);
        Ok(())
    }

    fn start(&self) -> PluginResult {
        self.core.expect(&[PluginState::Prepared])?;
        self.frame_counter.store(0, Ordering::Relaxed);
        self.core.transition(PluginState::Running)
    }

    fn stop(&self) -> PluginResult {
        self.core.expect(&[PluginState::Running])?;
        self.core.transition(PluginState::Prepared)
    }

    fn pause(&self) -> PluginResult {
        self.core.pause()
    }

    fn resume(&self) -> PluginResult {
        self.core.resume()
    }

    fn get_parameter(&self, tag: Tag) -> PluginResult<ParamValue> {
        self.core.get_parameter(tag)
    }

    fn set_parameter(&self, tag: Tag, value: ParamValue) -> PluginResult {
        self.core.set_parameter(tag, value)
    }

    fn push_data(&self, _in_port: &str, buffer: Option<AvTransBuffer>, _offset: i64) -> PluginResult {
        let mut buffer = accept_buffer(&self.core, buffer)?;
        if buffer.is_empty() {
            return Err(PluginError::InvalidParameter);
        }
        match self.core.state() {
            PluginState::Running => {}
            PluginState::Paused => {
                tracing::trace!(plugin = %self.core.name(), "paused, frame dropped");
                return Ok(());
            }
            state => {
                tracing::debug!(plugin = %self.core.name(), ?state, "not running, frame rejected");
                return Err(PluginError::WrongState);
            }
        }

        let params = self.core.params();
        let frame_num = self.next_frame();
        if let Some(meta) = buffer.audio_meta_mut() {
            meta.pts = now_ms();
            meta.frame_num = frame_num;
            if let Some(ParamValue::SampleFormat(format)) = params.get(Tag::AudioSampleFormat) {
                meta.format = *format;
            } else if meta.format == AudioSampleFormat::None {
                meta.format = AudioSampleFormat::S16;
            }
            if let Some(channels) = params.int(Tag::AudioChannels) {
                meta.channels = u32::try_from(channels).unwrap_or_default();
            }
            if let Some(rate) = params.int(Tag::AudioSampleRate) {
                meta.sample_rate = u32::try_from(rate).unwrap_or_default();
            }
        }

        if !self.core.data_slot().deliver(buffer) {
            tracing::debug!(plugin = %self.core.name(), "no data callback, frame dropped");
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

/// Output plugin that hands audio frames to the local audio service.
///
/// When a shared clock is configured, every delivered frame publishes its
/// `(frame number, pts)` as the master clock for video synchronization.
pub struct LocalAudioOutput {
    core: PluginCore,
    drain: Drain,
    clock: Mutex<Option<Arc<SharedClock>>>,
    paused: Arc<AtomicBool>,
}

impl LocalAudioOutput {
    /// Create an audio output.
    pub fn new(name: &str, media_type: MediaType, ctx: &PluginContext) -> Arc<Self> {
        Arc::new(Self {
            core: PluginCore::new(name, PluginKind::Output, media_type),
            drain: Drain::new(name, &ctx.config),
            clock: Mutex::new(None),
            paused: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(crate) fn factory(desc: &PluginDescriptor, ctx: &PluginContext) -> Arc<dyn AvTransPlugin> {
        Self::new(&desc.name, descriptor_media_type(desc), ctx)
    }

    fn release(&self) {
        self.drain.destroy();
        self.clock.lock().unwrap().take();
        self.paused.store(false, Ordering::Release);
    }
}

impl AvTransPlugin for LocalAudioOutput {
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
        let clock = open_clock(&self.core)?;
        *self.clock.lock().unwrap() = clock;
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
        let clock = self.clock.lock().unwrap().clone();
        let paused = Arc::clone(&self.paused);
        let name = self.core.name().to_string();
        self.drain.start(move |buffer| {
            if paused.load(Ordering::Acquire) {
                return;
            }
            let unit = ClockUnit {
                frame_num: buffer.meta().frame_num(),
                pts: buffer.meta().pts(),
            };
            if !slot.deliver(buffer) {
                tracing::debug!(plugin = %name, "no data callback, frame dropped");
                return;
            }
            if let Some(clock) = &clock {
                clock.write(unit);
            }
        })?;
        self.core.transition(PluginState::Running)
    }

    fn stop(&self) -> PluginResult {
        self.core.expect(&[PluginState::Running])?;
        self.drain.stop();
        self.core.transition(PluginState::Prepared)
    }

    fn pause(&self) -> PluginResult {
        self.core.pause()?;
        self.paused.store(true, Ordering::Release);
        Ok(())
    }

    fn resume(&self) -> PluginResult {
        self.core.resume()?;
        self.paused.store(false, Ordering::Release);
        Ok(())
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

impl std::fmt::Debug for LocalAudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudioOutput")
            .field("core", &self.core)
            .field("clock", &self.clock.lock().unwrap().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelAdapter, LoopbackBus};
    use crate::config::TransportConfig;
    use crate::memory::AvTransSharedMemory;
    use std::os::fd::AsRawFd;
    use std::sync::mpsc;
    use std::time::Duration;

    fn context() -> PluginContext {
        let bus = LoopbackBus::new();
        let config = TransportConfig::default();
        PluginContext {
            channel: ChannelAdapter::new(bus.endpoint("dev-local"), &config),
            config: Arc::new(config),
        }
    }

    fn frame(len: usize) -> AvTransBuffer {
        AvTransBuffer::with_data(MediaType::Audio, vec![0u8; len])
    }

    #[test]
    fn test_input_stamps_frames() {
        let input = LocalAudioInput::new("local_audio_service_input");
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        input
            .set_data_callback(Arc::new(move |buffer| {
                let _ = tx.lock().unwrap().send(buffer);
            }))
            .unwrap();
        input.init().unwrap();
        input.prepare().unwrap();
        input.start().unwrap();

        let before = now_ms();
        input.push_data("in", Some(frame(16)), 0).unwrap();
        input.push_data("in", Some(frame(16)), 0).unwrap();
        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first.meta().frame_num(), 1);
        assert_eq!(second.meta().frame_num(), 2);
        assert!(first.meta().pts() >= before);
    }

    #[test]
    fn test_input_delivers_only_while_running() {
        let input = LocalAudioInput::new("local_audio_service_input");
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        input
            .set_data_callback(Arc::new(move |buffer| {
                let _ = tx.lock().unwrap().send(buffer);
            }))
            .unwrap();

        assert_eq!(input.push_data("in", Some(frame(8)), 0), Err(PluginError::WrongState));
        input.init().unwrap();
        input.prepare().unwrap();
        assert_eq!(input.push_data("in", Some(frame(8)), 0), Err(PluginError::WrongState));
        assert!(rx.try_recv().is_err());

        input.start().unwrap();
        input.push_data("in", Some(frame(8)), 0).unwrap();
        assert_eq!(rx.recv().unwrap().meta().frame_num(), 1);

        input.stop().unwrap();
        assert_eq!(input.push_data("in", Some(frame(8)), 0), Err(PluginError::WrongState));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_input_rejects_bad_frames() {
        let input = LocalAudioInput::new("local_audio_service_input");
        assert_eq!(input.push_data("in", None, 0), Err(PluginError::NullPointer));
        assert_eq!(
            input.push_data("in", Some(frame(0)), 0),
            Err(PluginError::InvalidParameter)
        );
        let video = AvTransBuffer::with_data(MediaType::Video, vec![1u8]);
        assert_eq!(
            input.push_data("in", Some(video), 0),
            Err(PluginError::InvalidParameter)
        );
    }

    #[test]
    fn test_output_publishes_clock() {
        let ctx = context();
        let master = SharedClock::create("avtrans-test-clock", 64).unwrap();
        let output = LocalAudioOutput::new("local_audio_service_output", MediaType::Audio, &ctx);
        output.init().unwrap();
        output
            .set_parameter(Tag::UserSharedMemoryFd, master.descriptor().marshal().into())
            .unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        output
            .set_data_callback(Arc::new(move |buffer| {
                let _ = tx.lock().unwrap().send(buffer.meta().frame_num());
            }))
            .unwrap();
        output.prepare().unwrap();
        output.start().unwrap();

        let mut buffer = frame(4);
        buffer.stamp(5000, 12);
        output.push_data("out", Some(buffer), 0).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 12);

        output.stop().unwrap();
        assert_eq!(
            master.read(),
            Some(ClockUnit {
                frame_num: 12,
                pts: 5000
            })
        );
        assert_eq!(output.stop(), Err(PluginError::WrongState));
    }

    #[test]
    fn test_output_rejects_truncated_clock() {
        let ctx = context();
        let file = tempfile::tempfile().unwrap();
        let descriptor = AvTransSharedMemory {
            fd: file.as_raw_fd(),
            size: 64,
            name: "truncated".into(),
        };
        let output = LocalAudioOutput::new("local_audio_service_output", MediaType::Audio, &ctx);
        output.init().unwrap();
        output
            .set_parameter(Tag::UserSharedMemoryFd, descriptor.marshal().into())
            .unwrap();

        assert_eq!(output.prepare(), Err(PluginError::InvalidParameter));
        assert_eq!(output.state(), PluginState::Initialized);
    }
}
