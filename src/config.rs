//! Transport configuration.
//!
//! One [`TransportConfig`] is built at the composition root and shared by all
//! engines and plugins through the engine context. Every field has a default,
//! so a partial JSON document overrides only what it names:
//!
//! ```rust
//! use avtrans::config::TransportConfig;
//!
//! let config = TransportConfig::from_json_str(r#"{"queue_capacity": 4}"#).unwrap();
//! assert_eq!(config.queue_capacity, 4);
//! assert_eq!(config.drain_wait_ms, 20);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for queues, sessions and synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum buffers held by a plugin queue before the oldest is dropped.
    pub queue_capacity: usize,
    /// Upper bound in milliseconds a drain worker sleeps waiting for data.
    pub drain_wait_ms: u64,
    /// Suffix of data sessions opened by senders.
    pub sender_data_session_suffix: String,
    /// Suffix of data sessions served by receivers.
    pub receiver_data_session_suffix: String,
    /// Suffix of the control session, before the role suffix.
    pub control_session_suffix: String,
    /// Largest control message accepted, in bytes.
    pub max_message_len: usize,
    /// Video frames lagging the master clock by more than this are dropped.
    pub av_sync_drop_threshold_ms: i64,
    /// Frame rate assumed when none is configured.
    pub default_frame_rate: u32,
    /// Package name used when creating channel servers.
    pub package_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            drain_wait_ms: 20,
            sender_data_session_suffix: "_avtrans.sender.data".into(),
            receiver_data_session_suffix: "_avtrans.receiver.data".into(),
            control_session_suffix: "_avtrans.control".into(),
            max_message_len: 40 * 1024,
            av_sync_drop_threshold_ms: 200,
            default_frame_rate: 30,
            package_name: "dhardware.avtrans".into(),
        }
    }
}

impl TransportConfig {
    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.drain_wait_ms == 0 {
            return Err(Error::Config("drain_wait_ms must be at least 1".into()));
        }
        if self.sender_data_session_suffix == self.receiver_data_session_suffix {
            return Err(Error::Config(
                "sender and receiver session suffixes must differ".into(),
            ));
        }
        if self.default_frame_rate == 0 {
            return Err(Error::Config("default_frame_rate must be positive".into()));
        }
        Ok(())
    }

    /// Drain wait as a [`Duration`].
    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms)
    }
}
