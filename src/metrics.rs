//! Metrics instrumentation for hostport-dns.
//!
//! All metrics are prefixed with `hostport_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::Apex => "apex",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::Fallthrough => "fallthrough",
        QueryResult::PassThrough => "pass_through",
        QueryResult::Error => "error",
    };

    counter!("hostport_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("hostport_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Query answered from the index.
    Success,
    /// Query for a zone apex, answered with SOA only.
    Apex,
    /// No published instance matched.
    NxDomain,
    /// No published instance matched and the query went to the next handler.
    Fallthrough,
    /// Query outside our zones or of an unsupported type.
    PassThrough,
    /// Query failed with a server error.
    Error,
}

/// Record a change applied by the reconciler.
pub fn record_reconcile_event(event_type: ReconcileEventType) {
    let event_str = match event_type {
        ReconcileEventType::Listed => "listed",
        ReconcileEventType::Added => "added",
        ReconcileEventType::Modified => "modified",
        ReconcileEventType::Deleted => "deleted",
        ReconcileEventType::Restarted => "restarted",
        ReconcileEventType::Error => "error",
    };

    counter!("hostport_dns.reconcile.event.count", "event" => event_str).increment(1);
}

/// Reconciler event types.
#[derive(Debug, Clone, Copy)]
pub enum ReconcileEventType {
    /// Initial enumeration loaded.
    Listed,
    /// Instance added.
    Added,
    /// Instance changed.
    Modified,
    /// Instance removed.
    Deleted,
    /// Source enumerated again after losing history.
    Restarted,
    /// Error reported by the source stream.
    Error,
}

/// Record a reconnect of the source's change stream.
pub fn record_source_reconnect(reason: ReconnectReason) {
    let reason_str = match reason {
        ReconnectReason::StreamEnded => "stream_ended",
        ReconnectReason::Error => "error",
        ReconnectReason::Expired => "expired",
    };

    counter!("hostport_dns.source.reconnect.count", "reason" => reason_str).increment(1);
}

/// Reconnect reasons.
#[derive(Debug, Clone, Copy)]
pub enum ReconnectReason {
    /// Watch ended normally (server-side timeout).
    StreamEnded,
    /// Watch failed.
    Error,
    /// Resume position expired, full enumeration needed.
    Expired,
}

/// Record index sizes (call periodically or on change).
pub fn record_index_counts(instances: usize, published: usize, label_keys: usize, reverse_keys: usize) {
    gauge!("hostport_dns.index.instances.count").set(instances as f64);
    gauge!("hostport_dns.index.instances.published").set(published as f64);
    gauge!("hostport_dns.index.label_keys.count").set(label_keys as f64);
    gauge!("hostport_dns.index.reverse_keys.count").set(reverse_keys as f64);
}

/// Record readiness state.
pub fn record_synced(synced: bool) {
    gauge!("hostport_dns.index.synced").set(if synced { 1.0 } else { 0.0 });
}

/// Record the index generation.
pub fn record_generation(generation: u64) {
    gauge!("hostport_dns.index.generation").set(generation as f64);
}

/// Record the number of records in a successful answer.
pub fn record_records_returned(count: usize) {
    histogram!("hostport_dns.query.records_returned").record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
