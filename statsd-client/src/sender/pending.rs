use indexmap::IndexMap;

use crate::{
    formatter::LineFormatter,
    metric::{Metric, MetricKey},
};

use super::Pipeline;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum EntryKey {
    // Counters and gauges: one line per key per flush window.
    Aggregated(MetricKey),

    // Everything else: one line per observation.
    Unique(u64),
}

struct Entry {
    metric: Metric,
    line: String,
}

/// Metrics accumulated by a background worker for a single payload.
///
/// Entries keep the order in which they were first seen. The encoded length of the payload is tracked as metrics are
/// added, so that the batch never grows past the maximum payload length, with the exception of a single oversized line.
pub(crate) struct PendingBatch {
    entries: IndexMap<EntryKey, Entry>,
    next_unique: u64,
    metrics: usize,
    lines_len: usize,
    max_payload_len: usize,
}

impl PendingBatch {
    pub fn new(max_payload_len: usize) -> Self {
        Self { entries: IndexMap::new(), next_unique: 0, metrics: 0, lines_len: 0, max_payload_len }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of metrics folded into the batch, counting each aggregated observation.
    pub fn metric_count(&self) -> usize {
        self.metrics
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the encoded length of the payload, including line separators.
    pub fn encoded_len(&self) -> usize {
        self.lines_len + self.entries.len().saturating_sub(1)
    }

    fn fits(&self, entries: usize, lines_len: usize) -> bool {
        // A lone line always fits, even if it is oversized: there is nowhere better for it to go.
        self.max_payload_len == 0
            || entries <= 1
            || lines_len + entries - 1 <= self.max_payload_len
    }

    /// Adds a metric to the batch, aggregating it into an existing entry where possible.
    ///
    /// If the metric, or the aggregated line, would not fit within the maximum payload length, the batch is left
    /// untouched and the metric is handed back.
    pub fn try_push(&mut self, formatter: &LineFormatter, metric: Metric) -> Result<(), Metric> {
        let key = match metric.aggregation_key() {
            Some(key) => EntryKey::Aggregated(key),
            None => EntryKey::Unique(self.next_unique),
        };

        if let Some(existing) = self.entries.get(&key) {
            let mut merged = existing.metric.clone();
            merged.aggregate(metric.clone());
            let line = formatter.render(&merged);

            let lines_len = self.lines_len - existing.line.len() + line.len();
            if !self.fits(self.entries.len(), lines_len) {
                return Err(metric);
            }

            self.lines_len = lines_len;
            self.metrics += 1;
            self.entries.insert(key, Entry { metric: merged, line });
            return Ok(());
        }

        let line = formatter.render(&metric);
        let lines_len = self.lines_len + line.len();
        if !self.fits(self.entries.len() + 1, lines_len) {
            return Err(metric);
        }

        if let EntryKey::Unique(_) = key {
            self.next_unique += 1;
        }

        self.lines_len = lines_len;
        self.metrics += 1;
        self.entries.insert(key, Entry { metric, line });
        Ok(())
    }

    /// Returns the rendered lines, in the order their metrics were first seen.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| entry.line.as_str())
    }

    /// Sends the batch.
    pub fn flush(self, pipeline: &Pipeline) {
        pipeline.emit_lines(self.lines());
    }
}
