//! Contract of the underlying mesh transport.

use crate::error::ChannelError;
use bytes::Bytes;
use std::sync::Weak;

/// Transport-assigned session identifier.
pub type SessionId = u64;

/// Local view of a session: our session name and the remote device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionInfo {
    /// Local session name.
    pub session_name: String,
    /// Remote device id.
    pub peer_dev_id: String,
}

/// Receiver of transport callbacks.
///
/// A transport calls its sink from its own dispatch thread, one callback at a
/// time, in the order the events happened.
pub trait TransportEventSink: Send + Sync {
    /// A session finished opening, successfully or not.
    fn on_session_opened(
        &self,
        session_id: SessionId,
        info: SessionInfo,
        result: Result<(), ChannelError>,
    );

    /// A session closed.
    fn on_session_closed(&self, session_id: SessionId);

    /// A byte message arrived.
    fn on_bytes_received(&self, session_id: SessionId, data: Bytes);

    /// A stream packet arrived with its side-channel metadata.
    fn on_stream_received(&self, session_id: SessionId, data: Bytes, ext: Bytes);
}

/// A peer-to-peer session transport.
pub trait ChannelTransport: Send + Sync {
    /// Id of the local device on this transport.
    fn local_device_id(&self) -> &str;

    /// Install the sink that receives callbacks.
    fn set_event_sink(&self, sink: Weak<dyn TransportEventSink>);

    /// Accept inbound sessions named `session_name`.
    fn create_server(&self, pkg_name: &str, session_name: &str) -> Result<(), ChannelError>;

    /// Stop accepting inbound sessions named `session_name`.
    fn remove_server(&self, pkg_name: &str, session_name: &str) -> Result<(), ChannelError>;

    /// Start opening a session; completion is reported through the sink.
    fn open_session(
        &self,
        session_name: &str,
        peer_session_name: &str,
        peer_dev_id: &str,
    ) -> Result<SessionId, ChannelError>;

    /// Close a session on both ends.
    fn close_session(&self, session_id: SessionId);

    /// Send a byte message.
    fn send_bytes(&self, session_id: SessionId, data: &[u8]) -> Result<(), ChannelError>;

    /// Send a stream packet.
    fn send_stream(&self, session_id: SessionId, data: &[u8], ext: &[u8])
    -> Result<(), ChannelError>;
}
