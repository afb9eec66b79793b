//! Engine events and control messages.
//!
//! Events flow upward: the channel adapter and the plugins produce them, the
//! engine consumes each one once to drive its state machine and then forwards
//! it to the registered callback. Control messages travel between peer
//! engines over the control session as JSON text.

use crate::error::MetaError;
use crate::plugin::PluginEventType;
use crate::util::{parse_object, require_str, require_u32};
use serde_json::json;

/// Kinds of engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A session to the peer opened.
    ChannelOpened,
    /// A session to the peer failed to open.
    ChannelOpenFail,
    /// A session to the peer closed.
    ChannelClosed,
    /// A control message arrived.
    DataReceived,
    /// The data path came up after start.
    StartSuccess,
    /// The data path failed to come up after start.
    StartFail,
    /// Unrecoverable engine failure.
    EngineError,
    /// A stream was added on the peer.
    AddStream,
    /// A stream was removed on the peer.
    RemoveStream,
    /// Anything else.
    Unknown,
}

/// An event delivered to an engine or its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvTransEvent {
    /// Kind of event.
    pub event_type: EventType,
    /// Payload: a session name, a message, or an error description.
    pub content: String,
    /// Peer device the event concerns.
    pub peer_dev_id: String,
}

impl AvTransEvent {
    /// Create an event.
    pub fn new(
        event_type: EventType,
        content: impl Into<String>,
        peer_dev_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            content: content.into(),
            peer_dev_id: peer_dev_id.into(),
        }
    }
}

/// Translate a data-channel plugin event into the engine event reported to
/// callers.
pub fn cast_event_type(event_type: PluginEventType) -> EventType {
    match event_type {
        PluginEventType::ChannelOpened => EventType::StartSuccess,
        PluginEventType::ChannelOpenFail => EventType::StartFail,
        PluginEventType::ChannelClosed => EventType::ChannelClosed,
        PluginEventType::Unknown => EventType::EngineError,
    }
}

const KEY_TYPE: &str = "type";
const KEY_CONTENT: &str = "content";
const KEY_DST_DEV_ID: &str = "dstDevId";
const MAX_DEVICE_ID_LEN: usize = 256;

/// A control message exchanged between peer engines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AvTransMessage {
    /// Application-defined message type.
    pub msg_type: u32,
    /// Message body.
    pub content: String,
    /// Destination device; empty means the engine's own peer.
    pub dst_dev_id: String,
}

impl AvTransMessage {
    /// Create a message.
    pub fn new(msg_type: u32, content: impl Into<String>, dst_dev_id: impl Into<String>) -> Self {
        Self {
            msg_type,
            content: content.into(),
            dst_dev_id: dst_dev_id.into(),
        }
    }

    /// Serialize as JSON text.
    pub fn marshal(&self) -> String {
        json!({
            KEY_TYPE: self.msg_type,
            KEY_CONTENT: self.content,
            KEY_DST_DEV_ID: self.dst_dev_id,
        })
        .to_string()
    }

    /// Parse JSON text, accepting contents up to `max_len` bytes.
    pub fn unmarshal(text: &str, max_len: usize) -> Result<Self, MetaError> {
        let obj = parse_object(text)?;
        Ok(Self {
            msg_type: require_u32(&obj, KEY_TYPE)?,
            content: require_str(&obj, KEY_CONTENT, max_len)?.to_string(),
            dst_dev_id: require_str(&obj, KEY_DST_DEV_ID, MAX_DEVICE_ID_LEN)?.to_string(),
        })
    }
}
