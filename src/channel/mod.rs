//! Mesh channel plumbing.
//!
//! - [`ChannelTransport`]: the session transport contract
//! - [`ChannelAdapter`]: session bookkeeping and listener dispatch
//! - [`LoopbackBus`]: in-process transport for tests and demos

mod adapter;
mod loopback;
mod transport;

pub use adapter::{ChannelAdapter, ChannelListener};
pub use loopback::{LoopbackBus, LoopbackTransport};
pub use transport::{ChannelTransport, SessionId, SessionInfo, TransportEventSink};

use crate::error::MetaError;
use crate::util::{parse_object, require_str};
use serde_json::json;

const KEY_OWNER_NAME: &str = "ownerName";
const KEY_PEER_DEV_ID: &str = "peerDevId";
const MAX_FIELD_LEN: usize = 256;

/// Description attached to a data-channel request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelDescription {
    /// Owner of the engine requesting the channel.
    pub owner_name: String,
    /// Device the channel leads to.
    pub peer_dev_id: String,
}

impl ChannelDescription {
    /// Create a description.
    pub fn new(owner_name: impl Into<String>, peer_dev_id: impl Into<String>) -> Self {
        Self {
            owner_name: owner_name.into(),
            peer_dev_id: peer_dev_id.into(),
        }
    }

    /// Serialize as JSON text.
    pub fn marshal(&self) -> String {
        json!({
            KEY_OWNER_NAME: self.owner_name,
            KEY_PEER_DEV_ID: self.peer_dev_id,
        })
        .to_string()
    }

    /// Parse JSON text.
    pub fn parse(text: &str) -> Result<Self, MetaError> {
        let obj = parse_object(text)?;
        Ok(Self {
            owner_name: require_str(&obj, KEY_OWNER_NAME, MAX_FIELD_LEN)?.to_string(),
            peer_dev_id: require_str(&obj, KEY_PEER_DEV_ID, MAX_FIELD_LEN)?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;

    #[test]
    fn test_description_keys() {
        let desc = ChannelDescription::new("ohos.dhardware.dscreen", "dev-b");
        let text = desc.marshal();
        assert!(text.contains("\"ownerName\""));
        assert!(text.contains("\"peerDevId\""));
        assert_eq!(ChannelDescription::parse(&text).unwrap(), desc);
        assert_eq!(
            ChannelDescription::parse(r#"{"ownerName":"x"}"#),
            Err(MetaError::MissingField(KEY_PEER_DEV_ID))
        );
    }

    #[test]
    fn test_peer_session_name_swaps_role() {
        let bus = LoopbackBus::new();
        let adapter = ChannelAdapter::new(bus.endpoint("dev-a"), &TransportConfig::default());
        assert_eq!(
            adapter.peer_session_name("owner_screen_avtrans.sender.data"),
            "owner_screen_avtrans.receiver.data"
        );
        assert_eq!(
            adapter.peer_session_name("owner_avtrans.control.receiver"),
            "owner_avtrans.control.sender"
        );
        assert_eq!(adapter.peer_session_name("plain"), "plain");
    }
}
