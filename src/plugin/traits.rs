//! The plugin contract.

use crate::buffer::AvTransBuffer;
use crate::error::PluginResult;
use crate::format::MediaType;
use crate::plugin::params::{ParamValue, Tag};
use std::sync::Arc;

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    /// Constructed, no resources held.
    Created,
    /// Resources allocated.
    Initialized,
    /// Registered with its transport, worker created.
    Prepared,
    /// Worker running.
    Running,
    /// Suspended from `Prepared` or `Running`.
    Paused,
}

impl PluginState {
    /// Whether a direct transition to `next` is allowed.
    ///
    /// `Reset` (to `Initialized`) and `Deinit` (to `Created`) are handled by
    /// the plugins themselves and bypass this table.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Created, Initialized)
                | (Initialized, Prepared)
                | (Prepared, Running)
                | (Running, Prepared)
                | (Running, Paused)
                | (Prepared, Paused)
                | (Paused, Running)
                | (Paused, Prepared)
        )
    }
}

/// Role of a plugin in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    /// Produces buffers.
    Input,
    /// Transforms buffers.
    Codec,
    /// Consumes buffers.
    Output,
}

/// Event kinds a plugin reports to its filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginEventType {
    /// The data channel is open.
    ChannelOpened,
    /// The data channel failed to open.
    ChannelOpenFail,
    /// The data channel closed.
    ChannelClosed,
    /// Anything else.
    Unknown,
}

/// Event reported by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEvent {
    /// Kind of event.
    pub event_type: PluginEventType,
    /// Free-form detail, usually the session name.
    pub description: String,
    /// Peer the event concerns.
    pub peer_dev_id: String,
}

/// Receiver of plugin events.
///
/// Plugins keep only a weak reference to their callback; dropping the last
/// strong handle unregisters it.
pub trait PluginCallback: Send + Sync {
    /// Handle an event. Must not block for long: it runs on the channel
    /// dispatch thread.
    fn on_event(&self, event: PluginEvent);
}

/// Sink for buffers a plugin produces.
pub type DataCallback = Arc<dyn Fn(AvTransBuffer) + Send + Sync>;

/// A transport, codec or local-service adapter behind a filter.
///
/// All methods take `&self`: plugins are shared between their filter, the
/// channel adapter and their drain worker, and guard their state internally.
pub trait AvTransPlugin: Send + Sync {
    /// Plugin name as registered.
    fn name(&self) -> &str;

    /// Role of this plugin.
    fn kind(&self) -> PluginKind;

    /// Media type of the buffers this plugin accepts or produces.
    fn media_type(&self) -> MediaType;

    /// Current lifecycle state.
    fn state(&self) -> PluginState;

    /// `Created` → `Initialized`.
    fn init(&self) -> PluginResult;

    /// Any state → `Created`, releasing everything.
    fn deinit(&self) -> PluginResult;

    /// `Initialized` → `Prepared`.
    fn prepare(&self) -> PluginResult;

    /// Any initialized state → `Initialized`.
    fn reset(&self) -> PluginResult;

    /// `Prepared` → `Running`.
    fn start(&self) -> PluginResult;

    /// `Running` → `Prepared`.
    fn stop(&self) -> PluginResult;

    /// Suspend delivery. Default: unsupported, answered with success.
    fn pause(&self) -> PluginResult {
        Ok(())
    }

    /// Resume delivery. Default: unsupported, answered with success.
    fn resume(&self) -> PluginResult {
        Ok(())
    }

    /// Read a parameter.
    fn get_parameter(&self, tag: Tag) -> PluginResult<ParamValue>;

    /// Write a parameter.
    fn set_parameter(&self, tag: Tag, value: ParamValue) -> PluginResult;

    /// Hand a buffer to the plugin. `None` models a missing buffer.
    fn push_data(&self, in_port: &str, buffer: Option<AvTransBuffer>, offset: i64)
    -> PluginResult;

    /// Register the event sink.
    fn set_callback(&self, callback: Option<Arc<dyn PluginCallback>>) -> PluginResult;

    /// Register the data sink.
    fn set_data_callback(&self, callback: DataCallback) -> PluginResult;
}
