use std::fmt::Write as _;

use crate::metric::{Metric, MetricValue};

/// Number of fractional digits written for floating-point values.
const FRACTIONAL_DIGITS: usize = 15;

/// Renders metrics into statsd lines.
///
/// A line has the form `<prefix>.<name>:<value>|<unit>[|@<sample rate>][|#<tag>,...]`, without a trailing newline.
#[derive(Clone, Debug, Default)]
pub struct LineFormatter {
    prefix: Option<String>,
}

impl LineFormatter {
    /// Creates a new `LineFormatter` with the given namespace prefix.
    ///
    /// Trailing dots are trimmed from the prefix, and a prefix that ends up empty is ignored.
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|prefix| prefix.trim_end_matches('.'))
            .filter(|prefix| !prefix.is_empty())
            .map(str::to_string);

        Self { prefix }
    }

    /// Returns the configured prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Renders the given metric as a single line.
    pub fn render(&self, metric: &Metric) -> String {
        let mut line = String::new();
        self.render_into(metric, &mut line);
        line
    }

    /// Renders the given metric, appending the line to `buf`.
    pub fn render_into(&self, metric: &Metric, buf: &mut String) {
        if let Some(prefix) = &self.prefix {
            buf.push_str(prefix);
            buf.push('.');
        }
        buf.push_str(metric.name());

        buf.push(':');
        write_value(buf, metric.value());

        buf.push('|');
        buf.push_str(metric.kind().unit());

        // A sample rate of 1.0 is the implied default.
        let sample_rate = metric.sample_rate();
        if sample_rate < 1.0 {
            let mut float_writer = ryu::Buffer::new();
            buf.push_str("|@");
            buf.push_str(float_writer.format(sample_rate));
        }

        for (i, tag) in metric.tags().iter().enumerate() {
            buf.push_str(if i == 0 { "|#" } else { "," });
            buf.push_str(tag);
        }
    }
}

fn write_value(buf: &mut String, value: &MetricValue) {
    match value {
        MetricValue::Integer(v) => {
            let mut int_writer = itoa::Buffer::new();
            buf.push_str(int_writer.format(*v));
        }
        MetricValue::FloatingPoint(v) => {
            let _ = write!(buf, "{v:.FRACTIONAL_DIGITS$}");
        }
        MetricValue::Delta(v) => write_delta(buf, *v),
        MetricValue::Text(v) => buf.push_str(v),
    }
}

/// Writes a gauge delta with an explicit sign.
///
/// Zero, including negative zero, is written as `+0`.
fn write_delta(buf: &mut String, delta: f64) {
    if delta == 0.0 {
        buf.push_str("+0");
        return;
    }

    buf.push(if delta.is_sign_negative() { '-' } else { '+' });

    let start = buf.len();
    let _ = write!(buf, "{:.FRACTIONAL_DIGITS$}", delta.abs());

    // Trim insignificant zeros, and the decimal point itself if nothing is left after it.
    if buf[start..].contains('.') {
        let trimmed_len = buf[start..].trim_end_matches('0').trim_end_matches('.').len();
        buf.truncate(start + trimmed_len);
    }
}
