//! Metrics collection using metrics-rs.

use metrics::{Unit, counter};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const BUFFERS_DROPPED: &str = "avtrans_buffers_dropped";
const BUFFERS_SENT: &str = "avtrans_buffers_sent";
const PACKETS_RECEIVED: &str = "avtrans_packets_received";
const PACKETS_DISCARDED: &str = "avtrans_packets_discarded";

/// Describe the transport metrics.
///
/// Call once at startup; later calls are no-ops.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_DROPPED,
        Unit::Count,
        "Buffers evicted from a full plugin queue"
    );
    metrics::describe_counter!(
        BUFFERS_SENT,
        Unit::Count,
        "Buffers handed to the channel by output plugins"
    );
    metrics::describe_counter!(
        PACKETS_RECEIVED,
        Unit::Count,
        "Stream packets accepted by input plugins"
    );
    metrics::describe_counter!(
        PACKETS_DISCARDED,
        Unit::Count,
        "Stream packets rejected as malformed"
    );
}

/// Record a buffer evicted from a plugin queue.
#[inline]
pub fn record_buffer_dropped(plugin: &str) {
    counter!(BUFFERS_DROPPED, "plugin" => plugin.to_string()).increment(1);
}

/// Record a buffer sent over a channel.
#[inline]
pub fn record_buffer_sent(plugin: &str) {
    counter!(BUFFERS_SENT, "plugin" => plugin.to_string()).increment(1);
}

/// Record an accepted stream packet.
#[inline]
pub fn record_packet_received(plugin: &str) {
    counter!(PACKETS_RECEIVED, "plugin" => plugin.to_string()).increment(1);
}

/// Record a malformed stream packet.
#[inline]
pub fn record_packet_discarded(plugin: &str) {
    counter!(PACKETS_DISCARDED, "plugin" => plugin.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        init_metrics();
        init_metrics();
        record_buffer_dropped("test");
        record_buffer_sent("test");
        record_packet_received("test");
        record_packet_discarded("test");
    }
}
