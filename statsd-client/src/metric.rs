use std::fmt;

/// The kind of a metric.
///
/// The kind fixes the unit tag used on the wire, and whether or not repeated observations of the same metric can be
/// combined into a single value before being sent.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum MetricKind {
    /// A counter. Aggregated by summing.
    Counting,

    /// A gauge. Aggregated by keeping the latest value.
    Gauge,

    /// A timer, in milliseconds.
    Timing,

    /// A histogram.
    Histogram,

    /// A meter.
    Meter,

    /// A set of unique string values.
    Set,
}

impl MetricKind {
    /// Returns the unit tag for this kind, as written on the wire.
    pub const fn unit(self) -> &'static str {
        match self {
            MetricKind::Counting => "c",
            MetricKind::Gauge => "g",
            MetricKind::Timing => "ms",
            MetricKind::Histogram => "h",
            MetricKind::Meter => "m",
            MetricKind::Set => "s",
        }
    }

    /// Returns `true` if same-keyed observations of this kind can be combined within a flush window.
    pub const fn is_aggregable(self) -> bool {
        matches!(self, MetricKind::Counting | MetricKind::Gauge)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unit())
    }
}

/// The value of a metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// An integer value, written in base 10.
    Integer(i64),

    /// A floating-point value, written in fixed-point notation with 15 fractional digits.
    FloatingPoint(f64),

    /// A signed change to a gauge, always written with a leading sign.
    Delta(f64),

    /// An opaque string, written verbatim.
    Text(String),
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Integer(i64::from(value))
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Integer(i64::from(value))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::FloatingPoint(value)
    }
}

/// A single metric observation.
///
/// The kind of a metric is fixed when it is constructed. Sample rate and tags can be attached afterwards with
/// [`Metric::with_sample_rate`] and [`Metric::with_tags`].
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    kind: MetricKind,
    name: String,
    value: MetricValue,
    sample_rate: f64,
    tags: Vec<String>,
}

impl Metric {
    fn new<N>(kind: MetricKind, name: N, value: MetricValue) -> Self
    where
        N: Into<String>,
    {
        Self { kind, name: name.into(), value, sample_rate: 1.0, tags: Vec::new() }
    }

    /// Creates a counter.
    pub fn counting<N: Into<String>>(name: N, value: i64) -> Self {
        Self::new(MetricKind::Counting, name, MetricValue::Integer(value))
    }

    /// Creates an absolute gauge.
    ///
    /// Integer values are written as-is, while floating-point values are written with 15 fractional digits.
    pub fn gauge<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<MetricValue>,
    {
        Self::new(MetricKind::Gauge, name, value.into())
    }

    /// Creates a gauge that adjusts the current value by `delta` instead of replacing it.
    ///
    /// Gauges are aggregated by keeping the latest observation, deltas included. When the background sender sees
    /// several deltas for the same gauge within one flush window, only the last one is sent: ten deltas of `+1` go out
    /// as a single `+1`, not `+10`.
    pub fn gauge_delta<N: Into<String>>(name: N, delta: f64) -> Self {
        Self::new(MetricKind::Gauge, name, MetricValue::Delta(delta))
    }

    /// Creates a timer, in milliseconds.
    pub fn timing<N: Into<String>>(name: N, milliseconds: i64) -> Self {
        Self::new(MetricKind::Timing, name, MetricValue::Integer(milliseconds))
    }

    /// Creates a histogram.
    pub fn histogram<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<MetricValue>,
    {
        Self::new(MetricKind::Histogram, name, value.into())
    }

    /// Creates a meter.
    pub fn meter<N: Into<String>>(name: N, value: i64) -> Self {
        Self::new(MetricKind::Meter, name, MetricValue::Integer(value))
    }

    /// Creates a set observation.
    pub fn set<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self::new(MetricKind::Set, name, MetricValue::Text(value.into()))
    }

    /// Sets the sample rate.
    ///
    /// Rates above 1 are clamped to 1. The sample rate is only recorded on the metric: deciding whether or not to send
    /// it happens in [`Sampler`](crate::Sampler). A metric with a rate of zero or less is never sent.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate.min(1.0);
        self
    }

    /// Sets the tags, replacing any existing ones.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single tag.
    #[must_use]
    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Returns the kind of this metric.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Returns the name of this metric, without any configured prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of this metric.
    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    /// Returns the sample rate of this metric.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Returns the tags of this metric.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the aggregation key for this metric, if it is of an aggregable kind.
    pub(crate) fn aggregation_key(&self) -> Option<MetricKey> {
        self.kind.is_aggregable().then(|| MetricKey {
            kind: self.kind,
            name: self.name.clone(),
            sample_rate_bits: self.sample_rate.to_bits(),
            tags: self.tags.clone(),
        })
    }

    /// Folds a newer observation of the same metric into this one.
    ///
    /// Counters are summed and gauges take the newer value. Callers must only combine metrics with equal aggregation
    /// keys; for other kinds, the newer value wins.
    pub(crate) fn aggregate(&mut self, newer: Metric) {
        debug_assert_eq!(self.aggregation_key(), newer.aggregation_key());

        match (self.kind, &mut self.value, newer.value) {
            (MetricKind::Counting, MetricValue::Integer(current), MetricValue::Integer(delta)) => {
                *current = current.saturating_add(delta);
            }
            (_, value, newer) => *value = newer,
        }
    }
}

/// Identity of an aggregable metric within a flush window.
///
/// Everything that ends up in the rendered line except the value itself.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct MetricKey {
    kind: MetricKind,
    name: String,
    sample_rate_bits: u64,
    tags: Vec<String>,
}
