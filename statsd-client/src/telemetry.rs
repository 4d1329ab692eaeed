use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Client telemetry.
///
/// `Telemetry` tracks what happened to the metrics handed to a client: how many were sent, sampled out or dropped, and
/// how many payloads and bytes made it to the transport. It is kept locally and never sent to the collector.
#[derive(Debug, Default)]
pub(crate) struct Telemetry {
    metrics_sent: AtomicU64,
    metrics_sampled_out: AtomicU64,
    metrics_dropped: AtomicU64,
    payloads_sent: AtomicU64,
    payloads_failed: AtomicU64,
    payloads_oversized: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_failed: AtomicU64,
}

impl Telemetry {
    /// Tracks metrics that were written into payloads.
    pub fn track_metrics_sent(&self, count: usize) {
        self.metrics_sent.fetch_add(count as u64, Relaxed);
    }

    /// Tracks a metric that was skipped by the sampler.
    pub fn track_metric_sampled_out(&self) {
        self.metrics_sampled_out.fetch_add(1, Relaxed);
    }

    /// Tracks metrics that were discarded without being sent, such as after shutdown.
    pub fn track_metrics_dropped(&self, count: usize) {
        self.metrics_dropped.fetch_add(count as u64, Relaxed);
    }

    /// Tracks a successful payload send.
    pub fn track_payload_send_succeeded(&self, bytes_len: usize) {
        self.payloads_sent.fetch_add(1, Relaxed);
        self.bytes_sent.fetch_add(bytes_len as u64, Relaxed);
    }

    /// Tracks a failed payload send.
    pub fn track_payload_send_failed(&self, bytes_len: usize) {
        self.payloads_failed.fetch_add(1, Relaxed);
        self.bytes_failed.fetch_add(bytes_len as u64, Relaxed);
    }

    /// Tracks a payload holding a single line larger than the maximum payload length.
    pub fn track_payload_oversized(&self) {
        self.payloads_oversized.fetch_add(1, Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            metrics_sent: self.metrics_sent.load(Relaxed),
            metrics_sampled_out: self.metrics_sampled_out.load(Relaxed),
            metrics_dropped: self.metrics_dropped.load(Relaxed),
            payloads_sent: self.payloads_sent.load(Relaxed),
            payloads_failed: self.payloads_failed.load(Relaxed),
            payloads_oversized: self.payloads_oversized.load(Relaxed),
            bytes_sent: self.bytes_sent.load(Relaxed),
            bytes_failed: self.bytes_failed.load(Relaxed),
        }
    }
}

/// Point-in-time copy of a client's telemetry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Metrics written into payloads handed to the transport. Aggregated metrics count once per line.
    pub metrics_sent: u64,

    /// Metrics skipped by the sampler.
    pub metrics_sampled_out: u64,

    /// Metrics discarded without being sent.
    pub metrics_dropped: u64,

    /// Payloads sent successfully.
    pub payloads_sent: u64,

    /// Payloads the transport failed to send.
    pub payloads_failed: u64,

    /// Payloads holding a single line larger than the maximum payload length.
    pub payloads_oversized: u64,

    /// Bytes sent successfully.
    pub bytes_sent: u64,

    /// Bytes in payloads the transport failed to send.
    pub bytes_failed: u64,
}
