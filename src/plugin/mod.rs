//! Plugin abstraction.
//!
//! A plugin is the concrete adapter behind a filter: a mesh-channel endpoint,
//! a local audio or screen service, or a codec. Every plugin follows the same
//! lifecycle:
//!
//! ```text
//! Created --init--> Initialized --prepare--> Prepared --start--> Running
//!                        ^                      ^  |                |
//!                        |                      |  +--pause--+      |
//!                      reset                    +----stop----+------+
//! ```
//!
//! Plugins are found through the [`PluginRegistry`], which maps a plugin
//! kind and MIME to an ordered list of [`PluginDescriptor`]s. Each
//! descriptor carries the plugin's capabilities and a factory.

mod base;
mod params;
mod queue;
mod registry;
mod traits;

pub use base::{DataSlot, PluginCore};
pub use params::{ParamKind, ParamMap, ParamValue, Tag};
pub use queue::{BufferQueue, DrainWorker, QueueStats};
pub use registry::{PluginContext, PluginDescriptor, PluginFactory, PluginRegistry};
pub use traits::{
    AvTransPlugin, DataCallback, PluginCallback, PluginEvent, PluginEventType, PluginKind,
    PluginState,
};
