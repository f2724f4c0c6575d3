//! Metrics definitions for the Conference Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cc_` prefix for Conference Controller
//! - `_total` suffix for counters
//!
//! No recorder is installed here; the embedding process owns the exporter.
//! Without one, every call records to the global no-op recorder.

use metrics::{counter, gauge};

/// Join outcomes for `cc_join_requests_total`.
pub mod outcome {
    /// Request reached a dialog in a new room.
    pub const CREATED: &str = "created";
    /// Request was forwarded to an existing room's focus.
    pub const FORWARDED: &str = "forwarded";
    /// Request was answered with an error status.
    pub const REJECTED: &str = "rejected";
    /// Nickname claim accepted.
    pub const ACCEPTED: &str = "accepted";
    /// Nickname claim lost to another participant.
    pub const CONFLICT: &str = "conflict";
}

// ============================================================================
// Room & Leg Metrics (Gauges)
// ============================================================================

/// Set the number of active rooms.
///
/// Metric: `cc_rooms_active`
pub fn set_rooms_active(count: u64) {
    // u64 to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_rooms_active").set(count as f64);
}

/// Set the number of linked legs.
///
/// Metric: `cc_legs_active`
pub fn set_legs_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_legs_active").set(count as f64);
}

// ============================================================================
// Traffic Metrics (Counters)
// ============================================================================

/// Record one chat message relayed by a room.
///
/// Metric: `cc_chat_messages_total`
pub fn record_chat_message() {
    counter!("cc_chat_messages_total").increment(1);
}

/// Record a join request.
///
/// Metric: `cc_join_requests_total`
/// Labels: `outcome` (created, forwarded, rejected)
pub fn record_join_request(outcome: &'static str) {
    counter!("cc_join_requests_total", "outcome" => outcome).increment(1);
}

/// Record a nickname claim.
///
/// Metric: `cc_nickname_requests_total`
/// Labels: `outcome` (accepted, conflict, rejected)
pub fn record_nickname_request(outcome: &'static str) {
    counter!("cc_nickname_requests_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Set the mailbox depth for an actor type.
///
/// Metric: `cc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Record an actor panic event.
///
/// Metric: `cc_actor_panics_total`
/// Labels: `actor_type`
///
/// Any non-zero value indicates a bug.
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("cc_actor_panics_total", "actor_type" => actor_type).increment(1);
}

/// Record a fan-out message dropped because a mailbox was full or closed.
///
/// Metric: `cc_messages_dropped_total`
/// Labels: `actor_type`
pub fn record_message_dropped(actor_type: &'static str) {
    counter!("cc_messages_dropped_total", "actor_type" => actor_type).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_rooms_active(0);
        set_legs_active(3);
        record_chat_message();
        record_join_request(outcome::CREATED);
        record_nickname_request(outcome::CONFLICT);
        set_actor_mailbox_depth("room", 10);
        record_actor_panic("leg");
        record_message_dropped("leg");
    }

    #[test]
    fn test_metric_names_and_values() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_rooms_active(2);
            set_legs_active(5);
            record_chat_message();
            record_chat_message();
            record_join_request(outcome::CREATED);
            record_join_request(outcome::FORWARDED);
            record_nickname_request(outcome::ACCEPTED);
            set_actor_mailbox_depth("room", 7);
            record_actor_panic("dialog");
            record_message_dropped("leg");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let names: std::collections::HashSet<String> = snapshot
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "cc_rooms_active",
            "cc_legs_active",
            "cc_chat_messages_total",
            "cc_join_requests_total",
            "cc_nickname_requests_total",
            "cc_actor_mailbox_depth",
            "cc_actor_panics_total",
            "cc_messages_dropped_total",
        ] {
            assert!(names.contains(expected), "missing metric {expected}");
        }

        let chat_total = snapshot
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "cc_chat_messages_total")
            .map(|(_, _, _, value)| value);
        assert!(
            matches!(chat_total, Some(DebugValue::Counter(2))),
            "unexpected chat counter {chat_total:?}"
        );

        let join_series = snapshot
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == "cc_join_requests_total")
            .count();
        assert_eq!(join_series, 2, "one series per outcome label");
    }
}
