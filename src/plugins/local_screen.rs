//! Adapters between the pipeline and the local screen service.

use super::{Drain, accept_buffer, descriptor_media_type, open_clock};
use crate::buffer::AvTransBuffer;
use crate::error::{PluginError, PluginResult};
use crate::format::MediaType;
use crate::memory::SharedClock;
use crate::metadata::BufferMeta;
use crate::observability::record_packet_discarded;
use crate::plugin::{
    AvTransPlugin, DataCallback, ParamValue, PluginCallback, PluginContext, PluginCore,
    PluginDescriptor, PluginKind, PluginState, Tag,
};
use crate::util::now_ms;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Input plugin fed by the local screen service.
///
/// Frames are stamped like audio frames. When a master clock is mapped, the
/// latest audio `(frame number, pts)` is copied into the video meta so the
/// receiving side can line both streams up.
pub struct LocalScreenInput {
    core: PluginCore,
    frame_counter: AtomicU32,
    clock: Mutex<Option<Arc<SharedClock>>>,
}

impl LocalScreenInput {
    /// Create a screen input.
    pub fn new(name: &str, media_type: MediaType) -> Arc<Self> {
        Arc::new(Self {
            core: PluginCore::new(name, PluginKind::Input, media_type),
            frame_counter: AtomicU32::new(0),
            clock: Mutex::new(None),
        })
    }

    pub(crate) fn factory(desc: &PluginDescriptor, _ctx: &PluginContext) -> Arc<dyn AvTransPlugin> {
        Self::new(&desc.name, descriptor_media_type(desc))
    }
}

impl AvTransPlugin for LocalScreenInput {
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
        self.clock.lock().unwrap().take();
        self.core.clear();
        self.core.force_state(PluginState::Created);
        Ok(())
    }

    fn prepare(&self) -> PluginResult {
        self.core.expect(&[PluginState::Initialized])?;
        let clock = open_clock(&self.core)?;
        *self.clock.lock().unwrap() = clock;
        self.core.transition(PluginState::Prepared)
    }

    fn reset(&self) -> PluginResult {
        self.clock.lock().unwrap().take();
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
        let frame_num = self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let master = self
            .clock
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|clock| clock.read());
        if let Some(meta) = buffer.video_meta_mut() {
            meta.pts = now_ms();
            meta.frame_num = frame_num;
            if let Some(width) = params.int(Tag::VideoWidth) {
                meta.width = u32::try_from(width).unwrap_or_default();
            }
            if let Some(height) = params.int(Tag::VideoHeight) {
                meta.height = u32::try_from(height).unwrap_or_default();
            }
            if let Some(ParamValue::PixelFormat(format)) = params.get(Tag::VideoPixelFormat) {
                meta.format = *format;
            }
            if let Some(master) = master {
                meta.ext_pts = master.pts;
                meta.ext_frame_num = master.frame_num;
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

impl std::fmt::Debug for LocalScreenInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalScreenInput")
            .field("core", &self.core)
            .field("clock", &self.clock.lock().unwrap().is_some())
            .finish()
    }
}

/// Output plugin that hands frames to the local screen service.
///
/// Delivery is paced to the configured frame rate. With a master clock,
/// frames lagging the audio clock by more than the configured threshold are
/// dropped.
pub struct LocalScreenOutput {
    core: PluginCore,
    drain: Drain,
    default_frame_rate: u32,
    sync_threshold_ms: i64,
    clock: Mutex<Option<Arc<SharedClock>>>,
    paused: Arc<AtomicBool>,
}

impl LocalScreenOutput {
    /// Create a screen output.
    pub fn new(name: &str, media_type: MediaType, ctx: &PluginContext) -> Arc<Self> {
        Arc::new(Self {
            core: PluginCore::new(name, PluginKind::Output, media_type),
            drain: Drain::new(name, &ctx.config),
            default_frame_rate: ctx.config.default_frame_rate,
            sync_threshold_ms: ctx.config.av_sync_drop_threshold_ms,
            clock: Mutex::new(None),
            paused: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(crate) fn factory(desc: &PluginDescriptor, ctx: &PluginContext) -> Arc<dyn AvTransPlugin> {
        Self::new(&desc.name, descriptor_media_type(desc), ctx)
    }

    fn frame_interval(&self) -> Duration {
        let rate = self
            .core
            .param_int(Tag::VideoFrameRate)
            .and_then(|rate| u32::try_from(rate).ok())
            .filter(|rate| *rate > 0)
            .unwrap_or(self.default_frame_rate)
            .max(1);
        Duration::from_micros(1_000_000 / u64::from(rate))
    }

    fn release(&self) {
        self.drain.destroy();
        self.clock.lock().unwrap().take();
        self.paused.store(false, Ordering::Release);
    }
}

/// Whether a frame presented at `frame_pts` lags the master clock too far.
fn lags_master(frame_pts: i64, master_pts: i64, threshold_ms: i64) -> bool {
    master_pts.saturating_sub(frame_pts) > threshold_ms
}

impl AvTransPlugin for LocalScreenOutput {
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
        let interval = self.frame_interval();
        let threshold = self.sync_threshold_ms;
        let name = self.core.name().to_string();
        let mut last_delivery: Option<Instant> = None;

        self.drain.start(move |buffer| {
            if paused.load(Ordering::Acquire) {
                return;
            }
            if let Some(master) = clock.as_ref().and_then(|clock| clock.read()) {
                let frame_pts = match buffer.meta() {
                    BufferMeta::Video(meta) if meta.ext_pts != 0 => meta.ext_pts,
                    meta => meta.pts(),
                };
                if lags_master(frame_pts, master.pts, threshold) {
                    tracing::debug!(
                        plugin = %name,
                        frame_pts,
                        master_pts = master.pts,
                        "frame behind master clock, dropped"
                    );
                    record_packet_discarded(&name);
                    return;
                }
            }
            if let Some(last) = last_delivery {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
            last_delivery = Some(Instant::now());
            if !slot.deliver(buffer) {
                tracing::debug!(plugin = %name, "no data callback, frame dropped");
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

impl std::fmt::Debug for LocalScreenOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalScreenOutput")
            .field("core", &self.core)
            .field("default_frame_rate", &self.default_frame_rate)
            .field("clock", &self.clock.lock().unwrap().is_some())
            .finish()
    }
}
