//! Tracing spans and structured log helpers.

use crate::util::anonymize;
use tracing::{Level, Span, span};

/// Span covering an engine operation.
///
/// ```rust,ignore
/// let _guard = span_engine("sender", "dhardware.screen", "start").entered();
/// ```
#[inline]
pub fn span_engine(role: &str, owner: &str, op: &str) -> Span {
    span!(Level::INFO, "engine", role = %role, owner = %owner, op = %op)
}

/// Span covering a plugin's drain worker.
#[inline]
pub fn span_plugin(plugin: &str) -> Span {
    span!(Level::DEBUG, "plugin", plugin = %plugin)
}

/// Span covering one channel dispatch.
#[inline]
pub fn span_channel(session: &str, peer_dev_id: &str) -> Span {
    span!(
        Level::DEBUG,
        "channel",
        session = %session,
        peer = %anonymize(peer_dev_id)
    )
}

/// Log a state machine transition.
#[inline]
pub fn trace_state_change(component: &str, from: &dyn std::fmt::Debug, to: &dyn std::fmt::Debug) {
    tracing::info!(
        component = %component,
        from = ?from,
        to = ?to,
        "state changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_without_subscriber() {
        let _engine = span_engine("sender", "dhardware.mic", "init").entered();
        let _plugin = span_plugin("mesh_channel_output").entered();
        let span = span_channel("session", "0123456789abcdefghijklmnop");
        let _guard = span.enter();
        trace_state_change("engine", &"Idle", &"Initialized");
    }
}
