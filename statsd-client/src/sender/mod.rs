use std::{sync::Arc, time::Duration};

use tracing::{error, trace};

use crate::{
    builder::BuildError,
    formatter::LineFormatter,
    metric::Metric,
    telemetry::Telemetry,
    transport::Transport,
    writer::{PayloadWriter, WriteResult},
};

mod background;
mod batch;
mod immediate;
mod pending;

pub(crate) use self::background::BackgroundSender;
pub(crate) use self::batch::BatchSender;
pub(crate) use self::immediate::ImmediateSender;

/// Default time window the background sender accumulates metrics for before flushing.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Strategy for handing metrics to the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SenderKind {
    /// Every metric is sent as soon as it is recorded, in its own payload.
    #[default]
    Immediate,

    /// Metrics are buffered until [`StatsdClient::flush`](crate::StatsdClient::flush) is called, and then packed into
    /// as few payloads as possible.
    Batch,

    /// Metrics are queued and sent by background worker threads.
    ///
    /// Each worker drains the queue without blocking, aggregating counters and gauges with the same name, tags and
    /// sample rate, and flushes when the queue is empty, the payload is full, or `max_delay` has elapsed since the
    /// first metric of the payload was taken.
    Background {
        /// Longest time a worker accumulates metrics before flushing.
        max_delay: Duration,

        /// Number of worker threads.
        workers: usize,
    },
}

impl SenderKind {
    /// Returns the background strategy with the default delay window and a single worker.
    pub fn background() -> Self {
        SenderKind::Background { max_delay: DEFAULT_MAX_DELAY, workers: 1 }
    }
}

/// Renders metrics, packs them into payloads and hands the payloads to the transport.
///
/// Shared by every sender strategy. Send failures are logged and counted, never returned.
pub(crate) struct Pipeline {
    formatter: LineFormatter,
    transport: Transport,
    max_payload_len: usize,
    telemetry: Arc<Telemetry>,
}

impl Pipeline {
    pub fn new(
        formatter: LineFormatter,
        transport: Transport,
        max_payload_len: usize,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self { formatter, transport, max_payload_len, telemetry }
    }

    pub fn formatter(&self) -> &LineFormatter {
        &self.formatter
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Renders and sends the given metrics, in order.
    pub fn emit_metrics<'a, I>(&self, metrics: I)
    where
        I: IntoIterator<Item = &'a Metric>,
    {
        let mut writer = PayloadWriter::new(self.max_payload_len);
        let mut line = String::new();
        let mut lines_written = 0;

        for metric in metrics {
            line.clear();
            self.formatter.render_into(metric, &mut line);
            self.write_line(&mut writer, line.as_bytes());
            lines_written += 1;
        }

        self.send_payloads(&mut writer, lines_written);
    }

    /// Sends already rendered lines, in order.
    pub fn emit_lines<I, L>(&self, lines: I)
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut writer = PayloadWriter::new(self.max_payload_len);
        let mut lines_written = 0;

        for line in lines {
            self.write_line(&mut writer, line.as_ref());
            lines_written += 1;
        }

        self.send_payloads(&mut writer, lines_written);
    }

    fn write_line(&self, writer: &mut PayloadWriter, line: &[u8]) {
        if writer.write_line(line) == WriteResult::Oversized {
            self.telemetry.track_payload_oversized();
        }
    }

    fn send_payloads(&self, writer: &mut PayloadWriter, lines_written: usize) {
        let mut payloads = writer.payloads();
        if payloads.is_empty() {
            return;
        }

        let mut payloads_sent = 0;
        let mut payloads_dropped = 0;

        while let Some(payload) = payloads.next_payload() {
            if let Err(e) = self.transport.send(payload) {
                error!(error = %e, transport = %self.transport.protocol(), "Failed to send payload.");
                self.telemetry.track_payload_send_failed(payload.len());
                payloads_dropped += 1;
            } else {
                self.telemetry.track_payload_send_succeeded(payload.len());
                payloads_sent += 1;
            }
        }

        self.telemetry.track_metrics_sent(lines_written);
        trace!(lines_written, payloads_sent, payloads_dropped, "Finished sending payloads.");
    }
}

/// A sender strategy.
pub(crate) enum Sender {
    Immediate(ImmediateSender),
    Batch(BatchSender),
    Background(BackgroundSender),
}

impl Sender {
    /// Creates the sender for the given strategy, spawning worker threads if needed.
    pub fn new(
        kind: &SenderKind,
        pipeline: Arc<Pipeline>,
        shutdown_timeout: Duration,
    ) -> Result<Self, BuildError> {
        let sender = match kind {
            SenderKind::Immediate => Sender::Immediate(ImmediateSender::new(pipeline)),
            SenderKind::Batch => Sender::Batch(BatchSender::new(pipeline)),
            SenderKind::Background { max_delay, workers } => Sender::Background(
                BackgroundSender::spawn(pipeline, *max_delay, *workers, shutdown_timeout)?,
            ),
        };

        Ok(sender)
    }

    pub fn send(&self, metric: Metric) {
        match self {
            Sender::Immediate(sender) => sender.send(&metric),
            Sender::Batch(sender) => sender.send(metric),
            Sender::Background(sender) => sender.send(metric),
        }
    }

    /// Sends anything buffered. Only the batch strategy buffers until asked to flush.
    pub fn flush(&self) {
        if let Sender::Batch(sender) = self {
            sender.flush();
        }
    }

    /// Stops the sender. Further sends are dropped. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        match self {
            Sender::Immediate(sender) => sender.shutdown(),
            Sender::Batch(sender) => sender.shutdown(),
            Sender::Background(sender) => sender.shutdown(),
        }
    }
}
