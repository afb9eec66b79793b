//! Observability: metric counters and tracing spans.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `avtrans_buffers_dropped` | Counter | Buffers evicted from a full plugin queue |
//! | `avtrans_buffers_sent` | Counter | Buffers handed to the channel by output plugins |
//! | `avtrans_packets_received` | Counter | Stream packets accepted by input plugins |
//! | `avtrans_packets_discarded` | Counter | Stream packets rejected as malformed |
//!
//! ## Tracing
//!
//! Spans are emitted per engine operation, per plugin worker and per
//! channel dispatch. Device ids are anonymized before they are recorded.

mod metrics;
mod tracing_support;

pub use metrics::{
    init_metrics, record_buffer_dropped, record_buffer_sent, record_packet_discarded,
    record_packet_received,
};
pub use tracing_support::{span_channel, span_engine, span_plugin, trace_state_change};
