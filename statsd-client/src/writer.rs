use std::{
    ops::{Deref, DerefMut},
    vec::Drain,
};

use bytes::Bytes;
use tracing::debug;

const LINE_SEPARATOR: u8 = b'\n';

/// Outcome of writing a single line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteResult {
    /// The line was added to the current payload.
    Appended,

    /// The current payload was full, so it was finalized and the line started a new payload.
    Started,

    /// The line was larger than the maximum payload length by itself, and was written as its own payload.
    Oversized,

    /// The line was empty and nothing was written.
    Empty,
}

/// Writes lines into newline-delimited payloads for efficient network I/O.
///
/// Statsd lines are newline delimited, so multiple lines can be sent in a single payload and trivially split apart by
/// the collector. Lines are accumulated greedily: a line joins the current payload if the payload, plus a separator,
/// plus the line, still fits within the maximum payload length. Otherwise, the current payload is finalized and the
/// line starts the next one. Lines are never split.
///
/// A maximum payload length of zero means payloads are unbounded.
pub struct PayloadWriter {
    max_payload_len: usize,
    payloads_buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PayloadWriter {
    /// Creates a new `PayloadWriter` with the given maximum payload length.
    pub fn new(max_payload_len: usize) -> Self {
        Self { max_payload_len, payloads_buf: Vec::new(), offsets: Vec::new() }
    }

    /// Returns the maximum payload length, where zero means unbounded.
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current payload.
    pub fn current_payload_len(&self) -> usize {
        self.payloads_buf.len() - self.last_offset()
    }

    /// Returns `true` if nothing has been written since the last call to [`payloads`](Self::payloads).
    pub fn is_empty(&self) -> bool {
        self.payloads_buf.is_empty()
    }

    /// Returns `true` if a line of `line_len` bytes could be appended to the current payload without exceeding the
    /// maximum payload length.
    ///
    /// An empty payload can always accept a line: an oversized line is written by itself rather than being dropped.
    pub fn would_fit(&self, line_len: usize) -> bool {
        let current_payload_len = self.current_payload_len();
        if self.max_payload_len == 0 || current_payload_len == 0 {
            return true;
        }

        current_payload_len + 1 + line_len <= self.max_payload_len
    }

    /// Finalizes the current payload and starts a new one.
    ///
    /// If the current payload is empty, this method does nothing.
    fn finalize_current_payload(&mut self) {
        if self.current_payload_len() == 0 {
            return;
        }

        self.offsets.push(self.payloads_buf.len());
    }

    /// Writes a single line.
    ///
    /// The line must not contain a newline itself, and must not carry a trailing newline.
    pub fn write_line(&mut self, line: &[u8]) -> WriteResult {
        if line.is_empty() {
            return WriteResult::Empty;
        }

        let mut result = WriteResult::Appended;
        if !self.would_fit(line.len()) {
            self.finalize_current_payload();
            result = WriteResult::Started;
        }

        if self.current_payload_len() != 0 {
            self.payloads_buf.push(LINE_SEPARATOR);
        }
        self.payloads_buf.extend_from_slice(line);

        // Oversized lines are best effort: they go out alone, and the transport or collector may well drop them.
        if self.max_payload_len != 0 && line.len() > self.max_payload_len {
            debug!(
                line_len = line.len(),
                max_payload_len = self.max_payload_len,
                "Line exceeds maximum payload length. Sending as its own payload."
            );
            self.finalize_current_payload();
            result = WriteResult::Oversized;
        }

        result
    }

    /// Writes multiple lines, in order.
    pub fn write_lines<I, L>(&mut self, lines: I)
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        for line in lines {
            self.write_line(line.as_ref());
        }
    }

    /// Returns a consuming iterator over all payloads written by this writer.
    ///
    /// The iterator will yield payloads in the order they were written, and the payloads will be cleared from the
    /// writer when the iterator is dropped.
    pub fn payloads(&mut self) -> Payloads<'_> {
        self.finalize_current_payload();

        Payloads::new(&mut self.payloads_buf, &mut self.offsets)
    }
}

/// Iterator over all payloads written by a `PayloadWriter`.
pub struct Payloads<'a> {
    payloads_buf: ConsumingBufferSwap<'a, u8>,
    start: usize,
    offsets: Drain<'a, usize>,
}

impl<'a> Payloads<'a> {
    fn new(payload_buf: &'a mut Vec<u8>, offsets: &'a mut Vec<usize>) -> Self {
        Self {
            payloads_buf: ConsumingBufferSwap::new(payload_buf),
            start: 0,
            offsets: offsets.drain(..),
        }
    }

    /// Returns the number of remaining payloads.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if there are no remaining payloads.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the next payload.
    ///
    /// If there are no more payloads, `None` is returned.
    pub fn next_payload(&mut self) -> Option<&[u8]> {
        let offset = self.offsets.next()?;

        let offset_buf = &self.payloads_buf[self.start..offset];
        self.start = offset;

        Some(offset_buf)
    }
}

/// Splits the given lines into payloads no longer than `max_payload_len` bytes, where zero means unbounded.
///
/// Lines within a payload are joined by a single newline. A line longer than the limit by itself is returned as its
/// own, oversized payload.
pub fn split_lines<I, L>(lines: I, max_payload_len: usize) -> Vec<Bytes>
where
    I: IntoIterator<Item = L>,
    L: AsRef<[u8]>,
{
    let mut writer = PayloadWriter::new(max_payload_len);
    writer.write_lines(lines);

    let mut payloads = writer.payloads();
    let mut split = Vec::with_capacity(payloads.len());
    while let Some(payload) = payloads.next_payload() {
        split.push(Bytes::copy_from_slice(payload));
    }

    split
}

// Keeps a drained `Vec<T>` in a consistent state even if the draining value is leaked.
//
// Swapping the buffer out for an empty one up front means the end state (an empty buffer) holds as soon as the swap
// is created. Dropping it hands the cleared original back to the source, so the allocation is reused. If the drop never
// runs, the source is still empty.
struct ConsumingBufferSwap<'a, T> {
    source: &'a mut Vec<T>,
    original: Vec<T>,
}

impl<'a, T> ConsumingBufferSwap<'a, T> {
    fn new(source: &'a mut Vec<T>) -> Self {
        let original = std::mem::take(source);
        Self { source, original }
    }
}

impl<'a, T> Drop for ConsumingBufferSwap<'a, T> {
    fn drop(&mut self) {
        self.original.clear();
        std::mem::swap(self.source, &mut self.original);
    }
}

impl<'a, T> Deref for ConsumingBufferSwap<'a, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.original
    }
}

impl<'a, T> DerefMut for ConsumingBufferSwap<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.original
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*, proptest};

    use super::{split_lines, PayloadWriter, WriteResult};

    fn payload_strings(max_payload_len: usize, lines: &[&str]) -> Vec<String> {
        split_lines(lines.iter(), max_payload_len)
            .into_iter()
            .map(|payload| String::from_utf8(payload.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn no_lines_no_payloads() {
        assert!(split_lines(Vec::<String>::new(), 512).is_empty());
        assert!(split_lines(Vec::<String>::new(), 0).is_empty());

        let mut writer = PayloadWriter::new(512);
        assert_eq!(writer.write_line(b""), WriteResult::Empty);
        assert!(writer.payloads().next_payload().is_none());
    }

    #[test]
    fn greedy_packing() {
        // Cases are defined as: max payload length, input lines, expected payloads.
        let cases: [(usize, &[&str], &[&str]); 6] = [
            (512, &["a:1|c", "b:2|c", "c:3|c"], &["a:1|c\nb:2|c\nc:3|c"]),
            (11, &["a:1|c", "b:2|c", "c:3|c"], &["a:1|c\nb:2|c", "c:3|c"]),
            (10, &["a:1|c", "b:2|c", "c:3|c"], &["a:1|c", "b:2|c", "c:3|c"]),
            (0, &["a:1|c", "b:2|c", "c:3|c"], &["a:1|c\nb:2|c\nc:3|c"]),
            (5, &["a:1|c"], &["a:1|c"]),
            (12, &["a:1|c", "long:1234|ms", "b:2|c"], &["a:1|c", "long:1234|ms", "b:2|c"]),
        ];

        for (max_payload_len, lines, expected) in cases {
            assert_eq!(payload_strings(max_payload_len, lines), expected, "max {max_payload_len}");
        }
    }

    #[test]
    fn exact_fit_is_not_split() {
        let line = "counter:12345|c";
        assert_eq!(payload_strings(line.len(), &[line]), [line]);

        let joined_len = line.len() * 2 + 1;
        assert_eq!(payload_strings(joined_len, &[line, line]), [format!("{line}\n{line}")]);
        assert_eq!(payload_strings(joined_len - 1, &[line, line]), [line, line]);
    }

    #[test]
    fn oversized_line_goes_out_alone() {
        let mut writer = PayloadWriter::new(10);
        assert_eq!(writer.write_line(b"a:1|c"), WriteResult::Appended);
        assert_eq!(writer.write_line(b"this.is.too.long:1|c"), WriteResult::Oversized);
        assert_eq!(writer.write_line(b"b:2|c"), WriteResult::Appended);
        assert_eq!(writer.write_line(b"c:3|c"), WriteResult::Started);

        let mut payloads = writer.payloads();
        assert_eq!(payloads.len(), 4);
        assert_eq!(payloads.next_payload(), Some(&b"a:1|c"[..]));
        assert_eq!(payloads.next_payload(), Some(&b"this.is.too.long:1|c"[..]));
        assert_eq!(payloads.next_payload(), Some(&b"b:2|c"[..]));
        assert_eq!(payloads.next_payload(), Some(&b"c:3|c"[..]));
        assert_eq!(payloads.next_payload(), None);
    }

    #[test]
    fn writer_is_reusable_after_draining() {
        let mut writer = PayloadWriter::new(64);
        writer.write_line(b"a:1|c");
        assert_eq!(writer.payloads().len(), 1);
        assert!(writer.is_empty());

        writer.write_line(b"b:2|c");
        let mut payloads = writer.payloads();
        assert_eq!(payloads.next_payload(), Some(&b"b:2|c"[..]));
    }

    proptest! {
        #[test]
        fn property_no_loss_no_fragments(
            max_payload_len in 0usize..256,
            lines in arb_vec("[a-z.]{1,24}:[0-9]{1,6}\\|(c|g|ms|h|m|s)", 0..128),
        ) {
            let payloads = split_lines(lines.iter(), max_payload_len);

            let mut rejoined = Vec::new();
            for payload in &payloads {
                let payload = std::str::from_utf8(payload).unwrap();
                let payload_lines = payload.split('\n').collect::<Vec<_>>();

                prop_assert!(!payload.is_empty());
                if max_payload_len != 0 && payload.len() > max_payload_len {
                    // Only a single, oversized line may exceed the limit.
                    prop_assert_eq!(payload_lines.len(), 1);
                }

                rejoined.extend(payload_lines.into_iter().map(str::to_string));
            }

            prop_assert_eq!(rejoined, lines);
        }
    }
}
