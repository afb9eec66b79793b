//! Filters: the pipeline's wrappers around plugins.
//!
//! A filter owns at most one plugin, chosen at prepare time by negotiating
//! capabilities with the filter downstream of it. Filters are stored in the
//! pipeline's DAG arena and reach their downstream neighbour through an
//! [`OutPort`], which holds the neighbour's [`FilterId`] and a weak handle to
//! the arena.
//!
//! ```text
//! Created --init--> Initialized --configure--> Preparing --prepare--> Ready --start--> Running
//!                        ^                                              |  ^              |
//!                        |                                              +--pause/resume---+
//!                        +-------------------- stop / reset ------------------------------+
//! ```
//!
//! An input filter runs the whole `Initialized → Ready` path in its own
//! `prepare`, configuring everything downstream as it goes. Codec and output
//! filters are configured by their upstream neighbour and only prepare their
//! plugin when the pipeline reaches them.

mod base;
mod codec;
mod input;
mod output;
mod port;

pub use codec::CodecFilter;
pub use input::AvInputFilter;
pub use output::AvOutputFilter;
pub use port::{FilterGraph, FilterId, Link, OutPort};

use crate::buffer::AvTransBuffer;
use crate::error::FilterResult;
use crate::format::Capability;
use crate::plugin::{AvTransPlugin, ParamMap, ParamValue, PluginEvent, PluginKind, Tag};
use std::sync::{Arc, Weak};

/// Lifecycle state of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterState {
    /// Constructed, not yet bound to an event receiver.
    #[default]
    Created,
    /// Ready to negotiate; holds no plugin.
    Initialized,
    /// Plugin chosen and configured, not yet prepared.
    Preparing,
    /// Plugin prepared.
    Ready,
    /// Plugin running.
    Running,
    /// Plugin paused from `Ready` or `Running`.
    Paused,
}

/// Receiver of plugin events surfaced by filters, normally the engine.
pub trait FilterEventReceiver: Send + Sync {
    /// Called on the plugin's thread with the name of the reporting filter.
    fn on_filter_event(&self, filter: &str, event: PluginEvent);
}

/// A pipeline stage wrapping one plugin.
pub trait Filter: Send + Sync {
    /// Filter name, also the name of its single input port.
    fn name(&self) -> &str;

    /// Kind of plugin this filter hosts.
    fn kind(&self) -> PluginKind;

    /// Current state.
    fn state(&self) -> FilterState;

    /// Bind the event receiver. `Created → Initialized`.
    fn init(&self, receiver: Weak<dyn FilterEventReceiver>) -> FilterResult;

    /// Store a parameter, forwarding it to the plugin unless it is running.
    fn set_parameter(&self, tag: Tag, value: ParamValue) -> FilterResult;

    /// Read a stored parameter.
    fn get_parameter(&self, tag: Tag) -> FilterResult<ParamValue>;

    /// Pick a plugin accepting `offered`, returning the accepted capability.
    fn negotiate(&self, offered: &Capability) -> FilterResult<Capability>;

    /// Instantiate and configure the negotiated plugin with `meta`.
    fn configure(&self, meta: &ParamMap) -> FilterResult;

    /// Prepare the plugin.
    fn prepare(&self) -> FilterResult;

    /// Start the plugin.
    fn start(&self) -> FilterResult;

    /// Stop and release the plugin, returning to `Initialized`.
    fn stop(&self) -> FilterResult;

    /// Pause the plugin.
    fn pause(&self) -> FilterResult;

    /// Resume the plugin.
    fn resume(&self) -> FilterResult;

    /// Release the plugin from any state, returning to `Initialized`.
    fn reset(&self) -> FilterResult;

    /// Push a buffer into the port named `in_port`.
    fn push_data(&self, in_port: &str, buffer: AvTransBuffer) -> FilterResult;

    /// Connect the output port.
    fn link_downstream(&self, port: OutPort) -> FilterResult;

    /// Plugin currently hosted.
    fn plugin(&self) -> Option<Arc<dyn AvTransPlugin>>;
}

/// Parameters implied by a negotiated capability.
pub(crate) fn caps_to_params(caps: &Capability) -> ParamMap {
    let mut params = ParamMap::new();
    let _ = params.set(Tag::Mime, caps.mime.as_str().into());
    if let Some(media_type) = caps.media_type() {
        let _ = params.set(Tag::MediaType, media_type.into());
    }
    if let Some(rate) = caps.sample_rates.fixate() {
        let _ = params.set(Tag::AudioSampleRate, i64::from(rate).into());
    }
    if let Some(channels) = caps.channels.fixate() {
        let _ = params.set(Tag::AudioChannels, i64::from(channels).into());
    }
    if let Some(format) = caps.pixel_formats.fixate() {
        let _ = params.set(Tag::VideoPixelFormat, ParamValue::PixelFormat(format));
    }
    params
}
