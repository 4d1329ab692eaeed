use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    metric::Metric,
    sampler::Sampler,
    sender::Sender,
    telemetry::{Telemetry, TelemetrySnapshot},
};

struct Inner {
    sender: Sender,
    sampler: Arc<dyn Sampler>,
    telemetry: Arc<Telemetry>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.sender.shutdown();
    }
}

/// A handle for sending metrics to a statsd collector.
///
/// Clients are created with [`StatsdBuilder`](crate::StatsdBuilder). Cloning a client is cheap, and all clones share
/// the same sender and transport. Sending never fails from the caller's point of view: metrics that cannot be
/// delivered are dropped, and the reason is logged.
///
/// The sender is shut down when [`shutdown`](Self::shutdown) is called, or when the last clone is dropped.
#[derive(Clone)]
pub struct StatsdClient {
    inner: Arc<Inner>,
}

impl StatsdClient {
    pub(crate) fn new(sender: Sender, sampler: Arc<dyn Sampler>, telemetry: Arc<Telemetry>) -> Self {
        Self { inner: Arc::new(Inner { sender, sampler, telemetry }) }
    }

    /// Sends a metric, subject to its sample rate.
    ///
    /// Metrics with a sample rate of zero or less are never sent, whatever the sampler decides.
    pub fn send(&self, metric: Metric) {
        let sample_rate = metric.sample_rate();
        if sample_rate < 1.0 && (sample_rate <= 0.0 || !self.inner.sampler.should_send(sample_rate)) {
            self.inner.telemetry.track_metric_sampled_out();
            return;
        }

        self.inner.sender.send(metric);
    }

    /// Adds `value` to a counter.
    pub fn count(&self, name: &str, value: i64) {
        self.send(Metric::counting(name, value));
    }

    /// Adds one to a counter.
    pub fn increment(&self, name: &str) {
        self.count(name, 1);
    }

    /// Subtracts one from a counter.
    pub fn decrement(&self, name: &str) {
        self.count(name, -1);
    }

    /// Sets a gauge.
    pub fn gauge<V>(&self, name: &str, value: V)
    where
        V: Into<crate::MetricValue>,
    {
        self.send(Metric::gauge(name, value));
    }

    /// Adjusts a gauge by `delta`.
    ///
    /// With the background sender, only the latest delta for a gauge within a flush window is sent. See
    /// [`Metric::gauge_delta`].
    pub fn gauge_delta(&self, name: &str, delta: f64) {
        self.send(Metric::gauge_delta(name, delta));
    }

    /// Records a timing, in milliseconds.
    pub fn timing(&self, name: &str, milliseconds: i64) {
        self.send(Metric::timing(name, milliseconds));
    }

    /// Records a timing from a [`Duration`], truncated to whole milliseconds.
    pub fn timing_duration(&self, name: &str, duration: Duration) {
        self.timing(name, i64::try_from(duration.as_millis()).unwrap_or(i64::MAX));
    }

    /// Records a histogram value.
    pub fn histogram<V>(&self, name: &str, value: V)
    where
        V: Into<crate::MetricValue>,
    {
        self.send(Metric::histogram(name, value));
    }

    /// Marks a meter.
    pub fn meter(&self, name: &str, value: i64) {
        self.send(Metric::meter(name, value));
    }

    /// Records a member of a set.
    pub fn set<V>(&self, name: &str, value: V)
    where
        V: Into<String>,
    {
        self.send(Metric::set(name, value));
    }

    /// Starts a timer that records the elapsed time under `name` when dropped.
    pub fn start_timer<N>(&self, name: N) -> Timer
    where
        N: Into<String>,
    {
        Timer { client: self.clone(), name: Some(name.into()), start: Instant::now() }
    }

    /// Runs `f`, recording how long it took under `name`, and returns its result.
    ///
    /// The time is recorded however `f` finishes: if it panics, the timing is still sent while the panic unwinds.
    pub fn time<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _timer = self.start_timer(name);
        f()
    }

    /// Sends any buffered metrics.
    ///
    /// Only the batch sender buffers metrics until flushed. For the other senders this does nothing.
    pub fn flush(&self) {
        self.inner.sender.flush();
    }

    /// Shuts the sender down.
    ///
    /// Further metrics are dropped. Background workers are stopped, waiting up to the configured shutdown timeout, and
    /// anything still queued or buffered is discarded. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        self.inner.sender.shutdown();
    }

    /// Returns a snapshot of this client's telemetry.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.telemetry.snapshot()
    }
}

/// Records the time elapsed since it was started, as a timing, when dropped.
///
/// Created by [`StatsdClient::start_timer`].
#[must_use = "the timer records when dropped, so dropping it immediately records a zero timing"]
pub struct Timer {
    client: StatsdClient,
    name: Option<String>,
    start: Instant,
}

impl Timer {
    /// Returns the time elapsed so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer without recording anything.
    pub fn cancel(mut self) {
        self.name = None;
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            self.client.send(Metric::timing(
                name,
                i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX),
            ));
        }
    }
}
