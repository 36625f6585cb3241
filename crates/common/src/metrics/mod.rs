//! Metrics and observability utilities
//!
//! Prometheus metrics for the attachment, audit and cleanup paths,
//! all sharing the `placement_` prefix.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Placement metrics
pub const METRICS_PREFIX: &str = "placement";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Attachment metrics
    describe_counter!(
        format!("{}_attachments_created_total", METRICS_PREFIX),
        Unit::Count,
        "Attachments created, by family"
    );

    describe_counter!(
        format!("{}_attachments_deleted_total", METRICS_PREFIX),
        Unit::Count,
        "Attachments deleted, by reason"
    );

    describe_counter!(
        format!("{}_attachment_conflicts_total", METRICS_PREFIX),
        Unit::Count,
        "Attachments rejected by a uniqueness rule"
    );

    // Audit metrics
    describe_counter!(
        format!("{}_snapshots_recorded_total", METRICS_PREFIX),
        Unit::Count,
        "Snapshots appended to the audit log"
    );

    describe_counter!(
        format!("{}_snapshot_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Saves whose state could not be serialized"
    );

    // Cleanup metrics
    describe_counter!(
        format!("{}_cleanup_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Scheduled cleanup runs"
    );

    describe_counter!(
        format!("{}_invitations_expired_total", METRICS_PREFIX),
        Unit::Count,
        "Invitations removed by the cleanup job"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_attachment_created(family: &str) {
    counter!(
        format!("{}_attachments_created_total", METRICS_PREFIX),
        "family" => family.to_string()
    )
    .increment(1);
}

pub fn record_attachments_deleted(reason: &str, count: u64) {
    counter!(
        format!("{}_attachments_deleted_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(count);
}

pub fn record_attachment_conflict(family: &str) {
    counter!(
        format!("{}_attachment_conflicts_total", METRICS_PREFIX),
        "family" => family.to_string()
    )
    .increment(1);
}

/// Helper to record audit metrics
pub fn record_snapshot(kind: &str, success: bool) {
    if success {
        counter!(
            format!("{}_snapshots_recorded_total", METRICS_PREFIX),
            "kind" => kind.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_snapshot_failures_total", METRICS_PREFIX),
            "kind" => kind.to_string()
        )
        .increment(1);
    }
}

pub fn record_cleanup(removed: u64) {
    counter!(format!("{}_cleanup_runs_total", METRICS_PREFIX)).increment(1);
    counter!(format!("{}_invitations_expired_total", METRICS_PREFIX)).increment(removed);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
