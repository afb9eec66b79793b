//! # avtrans
//!
//! AV transport engine for distributed hardware: a device streams its
//! camera, microphone, speaker or screen to a peer over a mesh transport.
//!
//! ## Layers
//!
//! - **Buffers**: [`buffer::AvTransBuffer`] with typed audio/video
//!   [`metadata`], and a shared-memory master clock in [`memory`]
//! - **Plugins**: the [`plugin::AvTransPlugin`] contract, a registry keyed
//!   by kind and MIME, and the built-ins in [`plugins`]
//! - **Filters and pipelines**: [`filter`] hosts plugins and negotiates
//!   capabilities, [`pipeline`] drives the filters as one unit
//! - **Channel**: [`channel::ChannelAdapter`] routes transport sessions to
//!   listeners
//! - **Engines**: [`engine::AvSenderEngine`] and
//!   [`engine::AvReceiverEngine`]
//! - **Control center**: [`control_center`] boundary and an in-process
//!   implementation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use avtrans::prelude::*;
//!
//! let registry = Arc::new(PluginRegistry::new());
//! register_builtin(&registry);
//! let config = Arc::new(TransportConfig::default());
//! let bus = LoopbackBus::new();
//! let channel = ChannelAdapter::new(bus.endpoint("dev-a"), &config);
//!
//! let sender = AvSenderEngine::new(
//!     EngineContext::new(registry, channel, config),
//!     OWNER_NAME_D_SCREEN,
//!     "dev-b",
//! );
//! sender.initialize()?;
//! sender.create_control_channel(&["dev-b".to_string()], ChannelAttribute::default())?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod channel;
pub mod config;
pub mod control_center;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod format;
pub mod memory;
pub mod metadata;
pub mod observability;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod util;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::AvTransBuffer;
    pub use crate::channel::{ChannelAdapter, LoopbackBus};
    pub use crate::config::TransportConfig;
    pub use crate::control_center::{ControlCenterKit, LocalControlCenter};
    pub use crate::engine::{
        AvReceiverEngine, AvSenderEngine, AvTransTag, ChannelAttribute, EngineCallback,
        EngineContext, OWNER_NAME_D_CAMERA, OWNER_NAME_D_MIC, OWNER_NAME_D_SCREEN,
        OWNER_NAME_D_SPEAKER, StateId,
    };
    pub use crate::error::{EngineError, EngineResult, Error, Result};
    pub use crate::event::{AvTransEvent, AvTransMessage, EventType};
    pub use crate::format::{MediaType, mime};
    pub use crate::metadata::BufferMeta;
    pub use crate::plugin::PluginRegistry;
    pub use crate::plugins::register_builtin;
    pub use std::sync::Arc;
}

pub use error::{Error, Result};
