use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::metric::Metric;

use super::Pipeline;

#[derive(Default)]
struct BatchState {
    metrics: Vec<Metric>,
    closed: bool,
}

/// Buffers metrics until explicitly flushed.
pub(crate) struct BatchSender {
    pipeline: Arc<Pipeline>,
    state: Mutex<BatchState>,
}

impl BatchSender {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline, state: Mutex::new(BatchState::default()) }
    }

    pub fn send(&self, metric: Metric) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            self.pipeline.telemetry().track_metrics_dropped(1);
            return;
        }

        state.metrics.push(metric);
    }

    /// Sends all buffered metrics, packed into as few payloads as possible.
    pub fn flush(&self) {
        // Take the buffer under the lock, but do all of the rendering and I/O outside of it so that concurrent
        // senders are never held up by the network.
        let metrics = std::mem::take(&mut self.state.lock().metrics);
        if metrics.is_empty() {
            return;
        }

        debug!(metrics = metrics.len(), "Flushing batch.");
        self.pipeline.emit_metrics(&metrics);
    }

    /// Stops accepting metrics, discarding anything that was not flushed.
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.metrics)
        };

        if !discarded.is_empty() {
            debug!(metrics = discarded.len(), "Discarding unflushed batch on shutdown.");
            self.pipeline.telemetry().track_metrics_dropped(discarded.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::BatchSender;
    use crate::{metric::Metric, sender::test_util::Collector};

    #[test]
    fn nothing_sent_until_flush() {
        let collector = Collector::new();
        let sender = BatchSender::new(collector.pipeline(None, 512));

        sender.send(Metric::counting("a", 1));
        sender.send(Metric::counting("a", 1));
        sender.send(Metric::timing("b", 20));
        assert!(collector.recv_all(Duration::from_millis(100)).is_empty());

        sender.flush();
        // Batches are not aggregated.
        assert_eq!(collector.recv(), "a:1|c\na:1|c\nb:20|ms");

        // The buffer is cleared by a flush.
        sender.flush();
        assert!(collector.recv_all(Duration::from_millis(100)).is_empty());
    }

    #[test]
    fn flush_splits_on_line_boundaries() {
        let collector = Collector::new();
        let sender = BatchSender::new(collector.pipeline(None, 24));

        let metrics = (0..10).map(|i| Metric::counting(format!("metric{i}"), i)).collect::<Vec<_>>();
        for metric in &metrics {
            sender.send(metric.clone());
        }
        sender.flush();

        let payloads = collector.recv_all(Duration::from_millis(200));
        assert!(payloads.len() > 1);
        assert!(payloads.iter().all(|payload| payload.len() <= 24));

        let lines = payloads.iter().flat_map(|payload| payload.split('\n')).collect::<Vec<_>>();
        let expected = (0..10).map(|i| format!("metric{i}:{i}|c")).collect::<Vec<_>>();
        assert_eq!(lines, expected);
    }

    #[test]
    fn concurrent_sends() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 50;

        let collector = Collector::new();
        let sender = Arc::new(BatchSender::new(collector.pipeline(None, 0)));

        let handles = (0..THREADS)
            .map(|_| {
                let sender = Arc::clone(&sender);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        sender.send(Metric::meter("hits", 1));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        sender.flush();
        let payload = collector.recv();
        assert_eq!(payload.split('\n').count(), THREADS * PER_THREAD);
    }

    #[test]
    fn shutdown_discards_and_stops() {
        let collector = Collector::new();
        let pipeline = collector.pipeline(None, 512);
        let sender = BatchSender::new(pipeline.clone());

        sender.send(Metric::counting("a", 1));
        sender.shutdown();
        sender.send(Metric::counting("b", 1));
        sender.flush();
        sender.shutdown();

        assert!(collector.recv_all(Duration::from_millis(100)).is_empty());
        assert_eq!(pipeline.telemetry().snapshot().metrics_dropped, 2);
    }
}
