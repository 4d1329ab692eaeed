use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::metric::Metric;

use super::Pipeline;

/// Sends every metric as soon as it is recorded.
pub(crate) struct ImmediateSender {
    pipeline: Arc<Pipeline>,
    closed: AtomicBool,
}

impl ImmediateSender {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline, closed: AtomicBool::new(false) }
    }

    pub fn send(&self, metric: &Metric) {
        if self.closed.load(Ordering::Acquire) {
            self.pipeline.telemetry().track_metrics_dropped(1);
            return;
        }

        self.pipeline.emit_metrics([metric]);
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
