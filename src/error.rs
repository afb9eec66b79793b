//! Error types for the AV transport engine.
//!
//! Errors are layered the way calls flow: plugins report [`PluginError`],
//! filters translate those into [`FilterError`], and engines translate filter
//! failures into the engine-facing [`EngineError`] code set. Lower-level
//! failures (I/O, system calls, JSON, configuration) use the crate [`Error`].

use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by plugin operations.
pub type PluginResult<T = ()> = std::result::Result<T, PluginError>;

/// Result type returned by filter and pipeline operations.
pub type FilterResult<T = ()> = std::result::Result<T, FilterError>;

/// Result type returned by engine entry points.
pub type EngineResult<T = ()> = std::result::Result<T, EngineError>;

/// Main error type for infrastructure operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Shared memory could not be created or mapped.
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Invalid configuration value or document.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Metadata could not be parsed.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

/// Status reported by plugins.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginError {
    /// The operation is not valid in the plugin's current state.
    #[error("wrong state")]
    WrongState,
    /// The operation could not be carried out.
    #[error("invalid operation")]
    InvalidOperation,
    /// A parameter had the wrong kind or value.
    #[error("invalid parameter")]
    InvalidParameter,
    /// A required value or collaborator was absent.
    #[error("null pointer")]
    NullPointer,
    /// The requested key does not exist.
    #[error("not existed")]
    NotExisted,
}

/// Status reported by filters and the pipeline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterError {
    /// The filter is not in a state that allows the operation.
    #[error("invalid state")]
    InvalidState,
    /// A plugin, port or downstream filter is missing.
    #[error("null pointer")]
    NullPointer,
    /// The operation failed.
    #[error("invalid operation")]
    InvalidOperation,
    /// A parameter value was rejected.
    #[error("invalid parameter value")]
    InvalidParameterValue,
    /// The requested key does not exist.
    #[error("not existed")]
    NotExisted,
    /// No plugin accepted the negotiated format.
    #[error("unsupported format")]
    UnsupportedFormat,
    /// Linking filters would fan out or form a cycle.
    #[error("invalid link")]
    InvalidLink,
}

impl From<PluginError> for FilterError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::WrongState => Self::InvalidState,
            PluginError::InvalidOperation => Self::InvalidOperation,
            PluginError::InvalidParameter => Self::InvalidParameterValue,
            PluginError::NullPointer => Self::NullPointer,
            PluginError::NotExisted => Self::NotExisted,
        }
    }
}

/// Engine-facing error codes.
///
/// Every variant has a stable integer code (see [`EngineError::code`]) so
/// callers on the far side of an IPC boundary can match on it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineError {
    /// Initialization failed.
    #[error("init failed")]
    InitFailed,
    /// A required argument was missing or empty.
    #[error("invalid param")]
    InvalidParam,
    /// An argument value was out of range or inconsistent.
    #[error("invalid param value")]
    InvalidParamValue,
    /// A collaborator was unavailable.
    #[error("null pointer")]
    NullPointer,
    /// The channel could not be opened.
    #[error("create channel failed")]
    CreateChannelFailed,
    /// The engine could not start.
    #[error("start failed")]
    StartFailed,
    /// The engine could not stop.
    #[error("stop failed")]
    StopFailed,
    /// A parameter could not be applied.
    #[error("setup failed")]
    SetupFailed,
    /// The pipeline could not be prepared.
    #[error("prepare failed")]
    PrepareFailed,
    /// A message could not be sent.
    #[error("send data failed")]
    SendDataFailed,
    /// A buffer could not be pushed into the pipeline.
    #[error("push data failed")]
    PushDataFailed,
    /// Resources could not be released.
    #[error("release failed")]
    ReleaseFailed,
    /// A control-center engine id was not found.
    #[error("engine not found")]
    EngineNotFound,
}

/// Code reported for a successful engine call.
pub const DH_AVT_SUCCESS: i32 = 0;

impl EngineError {
    /// Stable integer code for this error.
    pub fn code(self) -> i32 {
        match self {
            Self::InitFailed => -42001,
            Self::InvalidParam => -42002,
            Self::InvalidParamValue => -42003,
            Self::NullPointer => -42004,
            Self::CreateChannelFailed => -42005,
            Self::StartFailed => -42006,
            Self::StopFailed => -42007,
            Self::SetupFailed => -42008,
            Self::PrepareFailed => -42009,
            Self::SendDataFailed => -42010,
            Self::PushDataFailed => -42011,
            Self::ReleaseFailed => -42012,
            Self::EngineNotFound => -42013,
        }
    }

    /// Collapse an engine result into its integer code.
    pub fn code_of(result: &EngineResult) -> i32 {
        match result {
            Ok(()) => DH_AVT_SUCCESS,
            Err(err) => err.code(),
        }
    }
}

/// Errors raised by the channel adapter and transports.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Session name or peer id was empty.
    #[error("invalid session key")]
    InvalidKey,
    /// A listener is already registered for this session and peer.
    #[error("listener already registered for {0}")]
    ListenerExists(String),
    /// No session matches the key.
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// No server was created for the session name.
    #[error("server not found: {0}")]
    ServerNotFound(String),
    /// The peer device is not reachable on this transport.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    /// Payload exceeds the transport limit.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    /// The transport has shut down.
    #[error("transport closed")]
    Closed,
}

/// Errors raised while parsing wire metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    /// The document is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),
    /// The document is not a JSON object.
    #[error("expected a JSON object")]
    NotAnObject,
    /// A mandatory key is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// A key holds a value of the wrong type or out of range.
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_status_translation() {
        assert_eq!(FilterError::from(PluginError::WrongState), FilterError::InvalidState);
        assert_eq!(
            FilterError::from(PluginError::InvalidParameter),
            FilterError::InvalidParameterValue
        );
        assert_eq!(FilterError::from(PluginError::NullPointer), FilterError::NullPointer);
        assert_eq!(FilterError::from(PluginError::NotExisted), FilterError::NotExisted);
    }

    #[test]
    fn test_engine_codes_are_distinct() {
        let all = [
            EngineError::InitFailed,
            EngineError::InvalidParam,
            EngineError::InvalidParamValue,
            EngineError::NullPointer,
            EngineError::CreateChannelFailed,
            EngineError::StartFailed,
            EngineError::StopFailed,
            EngineError::SetupFailed,
            EngineError::PrepareFailed,
            EngineError::SendDataFailed,
            EngineError::PushDataFailed,
            EngineError::ReleaseFailed,
            EngineError::EngineNotFound,
        ];
        let mut codes: Vec<i32> = all.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert!(codes.iter().all(|c| *c < 0));
        assert_eq!(EngineError::code_of(&Ok(())), DH_AVT_SUCCESS);
    }
}
