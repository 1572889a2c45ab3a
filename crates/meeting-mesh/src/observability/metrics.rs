//! Metrics definitions for the meeting mesh.
//!
//! All metrics follow Prometheus naming conventions:
//! - `mesh_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to fixed outcome sets. Peer addresses and user ids
//! are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its handle for rendering.
///
/// Must be called before any metrics are recorded. Only the simulator
/// binary installs a recorder; library users bring their own.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Call negotiation spans signaling plus the remote answer timeout
        .set_buckets_for_metric(
            Matcher::Prefix("mesh_call_duration".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set call duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Peer links
// ============================================================================

/// Record the outcome of one outbound call.
///
/// Metric: `mesh_call_attempts_total`
/// Labels: `outcome` (connected, unreachable, duplicate, error)
pub fn record_call_attempt(outcome: &str) {
    counter!("mesh_call_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record how long a completed outbound call took.
///
/// Metric: `mesh_call_duration_seconds`
/// Labels: `outcome` (connected, unreachable, error)
pub fn record_call_duration(outcome: &str, duration: Duration) {
    histogram!("mesh_call_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

/// Record the handling of an unsolicited call.
///
/// Metric: `mesh_incoming_calls_total`
/// Labels: `outcome` (answered, rejected, error)
pub fn record_incoming_call(outcome: &str) {
    counter!("mesh_incoming_calls_total", "outcome" => outcome.to_string()).increment(1);
}

/// Set the number of links currently in `Connected`.
///
/// Metric: `mesh_peer_links_active`
pub fn set_peer_links_active(count: usize) {
    // usize to f64 conversion is safe for realistic mesh sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("mesh_peer_links_active").set(count as f64);
}

/// Record a connected link going away.
///
/// Metric: `mesh_peer_disconnects_total`
pub fn record_peer_disconnect() {
    counter!("mesh_peer_disconnects_total").increment(1);
}

// ============================================================================
// Identity
// ============================================================================

/// Record one address registration step.
///
/// Metric: `mesh_identity_claims_total`
/// Labels: `outcome` (claimed, collision, exhausted, error)
pub fn record_identity_claim(outcome: &str) {
    counter!("mesh_identity_claims_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Discovery
// ============================================================================

/// Record one discovery tick and the calls it issued.
///
/// Metrics: `mesh_discovery_ticks_total`, `mesh_discovery_calls_issued_total`
pub fn record_discovery_tick(calls_issued: usize) {
    counter!("mesh_discovery_ticks_total").increment(1);
    counter!("mesh_discovery_calls_issued_total")
        .increment(u64::try_from(calls_issued).unwrap_or(u64::MAX));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // These run against the global no-op recorder when none is installed.

    #[test]
    fn test_record_call_attempt() {
        for outcome in ["connected", "unreachable", "duplicate", "error"] {
            record_call_attempt(outcome);
        }
        record_call_duration("connected", Duration::from_millis(40));
    }

    #[test]
    fn test_record_identity_claim() {
        for outcome in ["claimed", "collision", "exhausted", "error"] {
            record_identity_claim(outcome);
        }
    }

    #[test]
    fn test_link_gauges() {
        set_peer_links_active(0);
        set_peer_links_active(12);
        record_peer_disconnect();
        record_incoming_call("answered");
        record_incoming_call("rejected");
    }

    #[test]
    fn test_discovery_tick_counts_issued_calls() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};
        use metrics_util::MetricKind;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        ::metrics::with_local_recorder(&recorder, || {
            record_discovery_tick(6);
            record_discovery_tick(0);
        });

        let issued = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| {
                (key.kind() == MetricKind::Counter
                    && key.key().name() == "mesh_discovery_calls_issued_total")
                    .then_some(value)
            });
        assert_eq!(issued, Some(DebugValue::Counter(6)));
    }

    #[test]
    fn test_metrics_are_captured() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        // Recorders are global; a sibling test may have installed one first.
        let _ = recorder.install();

        record_call_attempt("connected");
        record_call_duration("connected", Duration::from_millis(10));
        record_identity_claim("collision");
        set_peer_links_active(3);
        record_peer_disconnect();
        record_discovery_tick(6);
        record_incoming_call("answered");

        let metrics = snapshotter.snapshot().into_vec();
        assert!(
            metrics.len() >= 7,
            "Expected every mesh metric to be recorded, got {}",
            metrics.len()
        );
    }
}
