use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{select, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{builder::BuildError, metric::Metric};

use super::{pending::PendingBatch, Pipeline};

/// Queues metrics for a pool of background workers.
pub(crate) struct BackgroundSender {
    tx: Sender<Metric>,
    // Held so that metrics left behind by the workers stay countable once they exit.
    rx: Receiver<Metric>,
    pipeline: Arc<Pipeline>,
    pool: Mutex<Option<WorkerPool>>,
    closed: AtomicBool,
    shutdown_timeout: Duration,
}

struct WorkerPool {
    // Never sent on: dropping it is the cancellation signal.
    cancel_tx: Sender<()>,
    done_rx: Receiver<usize>,
    handles: Vec<Option<JoinHandle<()>>>,
}

impl BackgroundSender {
    /// Spawns `workers` worker threads (at least one) and returns the sender feeding them.
    pub fn spawn(
        pipeline: Arc<Pipeline>,
        max_delay: Duration,
        workers: usize,
        shutdown_timeout: Duration,
    ) -> Result<Self, BuildError> {
        let (tx, rx) = unbounded();
        Self::spawn_with_queue(tx, rx, pipeline, max_delay, workers, shutdown_timeout)
    }

    fn spawn_with_queue(
        tx: Sender<Metric>,
        rx: Receiver<Metric>,
        pipeline: Arc<Pipeline>,
        max_delay: Duration,
        workers: usize,
        shutdown_timeout: Duration,
    ) -> Result<Self, BuildError> {
        let (cancel_tx, cancel_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();

        let mut handles = Vec::new();
        for id in 0..workers.max(1) {
            let worker = Worker {
                id,
                rx: rx.clone(),
                cancel_rx: cancel_rx.clone(),
                pipeline: Arc::clone(&pipeline),
                max_delay,
                seed: None,
            };
            let done = DoneGuard { id, done_tx: done_tx.clone() };

            let spawned = thread::Builder::new()
                .name(format!("statsd-client-worker-{id}"))
                .spawn(move || {
                    let _done = done;
                    worker.run();
                });

            match spawned {
                Ok(handle) => handles.push(Some(handle)),
                Err(_) => {
                    // Dropping the cancellation sender stops any workers that did start.
                    drop(cancel_tx);
                    return Err(BuildError::Backend);
                }
            }
        }

        debug!(workers = handles.len(), ?max_delay, "Spawned background workers.");

        Ok(Self {
            tx,
            rx,
            pipeline,
            pool: Mutex::new(Some(WorkerPool { cancel_tx, done_rx, handles })),
            closed: AtomicBool::new(false),
            shutdown_timeout,
        })
    }

    /// Queues a metric. Never blocks.
    pub fn send(&self, metric: Metric) {
        if self.closed.load(Ordering::Acquire) || self.tx.send(metric).is_err() {
            self.pipeline.telemetry().track_metrics_dropped(1);
        }
    }

    /// Cancels the workers and waits, up to the shutdown timeout, for them to stop.
    ///
    /// Metrics still queued, or pending in a worker that had not flushed them yet, are dropped.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let Some(pool) = self.pool.lock().take() else {
            return;
        };
        let WorkerPool { cancel_tx, done_rx, mut handles } = pool;
        drop(cancel_tx);

        let deadline = Instant::now() + self.shutdown_timeout;
        let mut stopped = 0;
        while stopped < handles.len() {
            let Ok(id) = done_rx.recv_deadline(deadline) else {
                break;
            };

            if let Some(handle) = handles.get_mut(id).and_then(Option::take) {
                let _ = handle.join();
            }
            stopped += 1;
        }

        if stopped < handles.len() {
            warn!(
                workers = handles.len() - stopped,
                timeout = ?self.shutdown_timeout,
                "Background workers did not stop in time. Leaving them to finish on their own."
            );
        }

        let queued = self.rx.try_iter().count();
        if queued > 0 {
            debug!(metrics = queued, "Dropping queued metrics on shutdown.");
            self.pipeline.telemetry().track_metrics_dropped(queued);
        }
    }
}

impl Drop for BackgroundSender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Signals that a worker has exited, however it exited.
struct DoneGuard {
    id: usize,
    done_tx: Sender<usize>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.done_tx.send(self.id);
    }
}

/// Where a worker is in its flush cycle.
enum Cycle {
    // Waiting for the first metric of the next payload.
    Idle,

    // Pulling further metrics, without blocking, until the batch is full, the queue is empty, or the deadline passes.
    Accumulating { batch: PendingBatch, deadline: Instant },

    // Sending the batch.
    Flushing(PendingBatch),
}

struct Worker {
    id: usize,
    rx: Receiver<Metric>,
    cancel_rx: Receiver<()>,
    pipeline: Arc<Pipeline>,
    max_delay: Duration,

    // A metric that did not fit in the previous payload, which starts the next one.
    seed: Option<Metric>,
}

impl Worker {
    fn is_cancelled(&self) -> bool {
        matches!(self.cancel_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Counts whatever the worker was holding when it was cancelled as dropped.
    fn abandon(&mut self, batch: &PendingBatch) {
        let abandoned = batch.metric_count() + usize::from(self.seed.take().is_some());
        if abandoned > 0 {
            debug!(worker = self.id, metrics = abandoned, "Dropping pending metrics on cancellation.");
            self.pipeline.telemetry().track_metrics_dropped(abandoned);
        }
    }

    /// Waits for the next metric, returning `None` once cancelled or once every sender is gone.
    fn next_metric(&self) -> Option<Metric> {
        select! {
            recv(self.rx) -> msg => msg.ok(),
            recv(self.cancel_rx) -> _ => None,
        }
    }

    fn run(mut self) {
        trace!(worker = self.id, "Background worker started.");

        let mut cycle = Cycle::Idle;
        loop {
            cycle = match cycle {
                Cycle::Idle => {
                    let first = match self.seed.take() {
                        Some(metric) => metric,
                        None => match self.next_metric() {
                            Some(metric) => metric,
                            None => break,
                        },
                    };

                    let mut batch = PendingBatch::new(self.pipeline.max_payload_len());
                    // An empty batch accepts any metric.
                    if let Err(metric) = batch.try_push(self.pipeline.formatter(), first) {
                        self.seed = Some(metric);
                    }

                    Cycle::Accumulating { batch, deadline: Instant::now() + self.max_delay }
                }
                Cycle::Accumulating { mut batch, deadline } => {
                    if self.is_cancelled() {
                        self.abandon(&batch);
                        break;
                    }

                    if Instant::now() >= deadline {
                        Cycle::Flushing(batch)
                    } else {
                        match self.rx.try_recv() {
                            Ok(metric) => match batch.try_push(self.pipeline.formatter(), metric) {
                                Ok(()) => Cycle::Accumulating { batch, deadline },
                                Err(metric) => {
                                    self.seed = Some(metric);
                                    Cycle::Flushing(batch)
                                }
                            },
                            // A disconnected queue is noticed, and ends the worker, the next time it is idle.
                            Err(_) => Cycle::Flushing(batch),
                        }
                    }
                }
                Cycle::Flushing(batch) => {
                    if !batch.is_empty() {
                        trace!(
                            worker = self.id,
                            lines = batch.len(),
                            bytes = batch.encoded_len(),
                            "Flushing pending batch."
                        );
                        batch.flush(&self.pipeline);
                    }

                    Cycle::Idle
                }
            };
        }

        trace!(worker = self.id, "Background worker stopped.");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crossbeam_channel::unbounded;

    use super::{BackgroundSender, Worker};
    use crate::{metric::Metric, sender::test_util::Collector};

    /// Sums the values of every `c:<n>|c` line in the given payloads.
    fn counter_total(payloads: &[String]) -> usize {
        payloads
            .iter()
            .flat_map(|payload| payload.split('\n'))
            .map(|line| line.strip_prefix("c:").and_then(|rest| rest.strip_suffix("|c")).unwrap())
            .map(|value| value.parse::<usize>().unwrap())
            .sum()
    }

    /// Runs a single worker over whatever is already queued, until the queue is drained and closed.
    fn drain_with_worker(collector: &Collector, max_payload_len: usize, metrics: Vec<Metric>) {
        let (tx, rx) = unbounded();
        let (_cancel_tx, cancel_rx) = unbounded();
        for metric in metrics {
            tx.send(metric).unwrap();
        }
        drop(tx);

        let worker = Worker {
            id: 0,
            rx,
            cancel_rx,
            pipeline: collector.pipeline(None, max_payload_len),
            max_delay: Duration::from_secs(5),
            seed: None,
        };
        worker.run();
    }

    #[test]
    fn aggregates_counters_within_window() {
        let collector = Collector::new();
        drain_with_worker(&collector, 512, (0..10).map(|_| Metric::counting("testMetric", 1)).collect());

        assert_eq!(collector.recv_all(Duration::from_millis(200)), ["testMetric:10|c"]);
    }

    #[test]
    fn never_merges_timings() {
        let collector = Collector::new();
        drain_with_worker(&collector, 512, (0..10).map(|_| Metric::timing("testMetric", 1)).collect());

        let payloads = collector.recv_all(Duration::from_millis(200));
        let lines = payloads.iter().flat_map(|payload| payload.split('\n')).collect::<Vec<_>>();
        assert_eq!(lines, vec!["testMetric:1|ms"; 10]);
    }

    #[test]
    fn carries_unfitted_metric_into_next_payload() {
        let collector = Collector::new();
        let metrics = (0..6).map(|i| Metric::counting(format!("m{i}"), 1)).collect();
        // Each line is 6 bytes, so two fit in a 13 byte payload.
        drain_with_worker(&collector, 13, metrics);

        assert_eq!(
            collector.recv_all(Duration::from_millis(200)),
            ["m0:1|c\nm1:1|c", "m2:1|c\nm3:1|c", "m4:1|c\nm5:1|c"]
        );
    }

    #[test]
    fn flushes_when_delay_window_elapses() {
        let collector = Collector::new();
        let (tx, rx) = unbounded();
        let (_cancel_tx, cancel_rx) = unbounded();
        for _ in 0..20 {
            tx.send(Metric::counting("c", 1)).unwrap();
        }
        drop(tx);

        // With no window at all, the deadline has passed as soon as a payload is started, so nothing is aggregated
        // even though the queue is never empty.
        let worker = Worker {
            id: 0,
            rx,
            cancel_rx,
            pipeline: collector.pipeline(None, 512),
            max_delay: Duration::ZERO,
            seed: None,
        };
        worker.run();

        assert_eq!(collector.recv_all(Duration::from_millis(200)), vec!["c:1|c"; 20]);
    }

    #[test]
    fn busy_queue_flushes_every_window() {
        const METRICS: usize = 100_000;

        let collector = Collector::new();
        let (tx, rx) = unbounded();
        let (_cancel_tx, cancel_rx) = unbounded();
        for _ in 0..METRICS {
            tx.send(Metric::counting("c", 1)).unwrap();
        }
        drop(tx);

        // Every counter aggregates into the same short line, so the payload never fills up and only the delay window
        // can end a payload before the queue is drained.
        let worker = Worker {
            id: 0,
            rx,
            cancel_rx,
            pipeline: collector.pipeline(None, 512),
            max_delay: Duration::from_millis(2),
            seed: None,
        };
        worker.run();

        let payloads = collector.recv_all(Duration::from_millis(200));
        assert!(payloads.len() > 1, "expected several payloads, got {payloads:?}");
        assert_eq!(counter_total(&payloads), METRICS);
    }

    #[test]
    fn cancelled_worker_drops_pending_metrics() {
        let collector = Collector::new();
        let pipeline = collector.pipeline(None, 512);
        let (tx, rx) = unbounded();
        let (cancel_tx, cancel_rx) = unbounded::<()>();
        for _ in 0..5 {
            tx.send(Metric::counting("queued", 1)).unwrap();
        }
        drop(cancel_tx);

        let worker = Worker {
            id: 0,
            rx,
            cancel_rx,
            pipeline: pipeline.clone(),
            max_delay: Duration::from_secs(5),
            seed: Some(Metric::counting("carried", 1)),
        };
        worker.run();

        // The carried metric was pending when the cancellation was seen. The queue is left alone.
        assert!(collector.recv_all(Duration::from_millis(100)).is_empty());
        assert_eq!(pipeline.telemetry().snapshot().metrics_dropped, 1);
        assert_eq!(tx.len(), 5);
    }

    #[test]
    fn shutdown_abandons_queued_metrics() {
        const METRICS: usize = 200_000;

        let collector = Collector::new();
        let pipeline = collector.pipeline(None, 512);
        let (tx, rx) = unbounded();
        for _ in 0..METRICS {
            tx.send(Metric::counting("c", 1)).unwrap();
        }

        let shutdown_timeout = Duration::from_secs(5);
        let sender = BackgroundSender::spawn_with_queue(
            tx,
            rx,
            pipeline.clone(),
            Duration::from_secs(10),
            1,
            shutdown_timeout,
        )
        .unwrap();

        let started = Instant::now();
        sender.shutdown();
        assert!(started.elapsed() < shutdown_timeout);

        // Whatever was sent before the cancellation landed, plus everything dropped, accounts for every metric.
        let sent = counter_total(&collector.recv_all(Duration::from_millis(200)));
        let dropped = pipeline.telemetry().snapshot().metrics_dropped as usize;
        assert!(dropped > 0);
        assert!(sent < METRICS);
        assert_eq!(sent + dropped, METRICS);
    }

    #[test]
    fn sender_end_to_end() {
        let collector = Collector::new();
        let sender = BackgroundSender::spawn(
            collector.pipeline(Some("app"), 512),
            Duration::from_millis(50),
            2,
            Duration::from_secs(1),
        )
        .unwrap();

        for i in 0..20 {
            sender.send(Metric::timing("latency", i));
        }

        let payloads = collector.recv_all(Duration::from_millis(500));
        let mut lines = payloads.iter().flat_map(|payload| payload.split('\n')).collect::<Vec<_>>();
        lines.sort_unstable();

        let mut expected = (0..20).map(|i| format!("app.latency:{i}|ms")).collect::<Vec<_>>();
        expected.sort_unstable();
        assert_eq!(lines, expected);

        sender.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_sends() {
        let collector = Collector::new();
        let pipeline = collector.pipeline(None, 512);
        let sender = BackgroundSender::spawn(
            pipeline.clone(),
            Duration::from_millis(50),
            3,
            Duration::from_secs(1),
        )
        .unwrap();

        sender.shutdown();
        sender.shutdown();
        sender.send(Metric::counting("late", 1));

        assert!(collector.recv_all(Duration::from_millis(100)).is_empty());
        assert_eq!(pipeline.telemetry().snapshot().metrics_dropped, 1);
        assert!(sender.pool.lock().is_none());
    }
}
