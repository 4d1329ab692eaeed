//! A client for sending metrics to a [statsd][statsd]-compatible collector, with support for [DogStatsD][dsd] tags.
//!
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/datagram_shell/
//!
//! # Usage
//!
//! ```no_run
//! # use statsd_client::{Metric, SenderKind, StatsdBuilder};
//! // First, create a builder pointing at the collector.
//! //
//! // The builder can configure the port, the transport protocol, a namespace prefix for all metric names, how large
//! // payloads are allowed to get, and which strategy is used to send metrics.
//! let client = StatsdBuilder::new("127.0.0.1")
//!     .with_prefix("my_app")
//!     .with_sender(SenderKind::background())
//!     .build()
//!     .expect("failed to build client");
//!
//! // Clients are cheap to clone and can be shared between threads.
//! client.increment("requests");
//! client.gauge("connections.active", 12);
//! client.timing("request.latency", 37);
//!
//! // Metrics can also be built by hand, to set a sample rate or add tags.
//! client.send(Metric::counting("requests", 1).with_sample_rate(0.1).with_tag("route:/api"));
//!
//! // Time a block of code. The timing is sent even if the block panics.
//! let answer = client.time("compute", || 6 * 7);
//! # let _ = answer;
//! ```
//!
//! # Wire format
//!
//! Every metric is rendered as a single line:
//!
//! ```text
//! [<prefix>.]<name>:<value>|<unit>[|@<sample rate>][|#<tag>,<tag>,...]
//! ```
//!
//! The sample rate is only included when it is below 1. Lines are packed, newline-delimited, into payloads no longer
//! than the configured maximum payload length. A line is never split: a line longer than the maximum payload length by
//! itself is sent alone.
//!
//! # Senders
//!
//! How metrics get from the caller to the transport is controlled by [`SenderKind`]:
//!
//! - **immediate**: every metric is sent synchronously, in its own payload.
//! - **batch**: metrics are buffered until [`StatsdClient::flush`] is called, and then packed into as few payloads as
//!   possible.
//! - **background**: metrics are queued without blocking and sent by worker threads. Counters and gauges sent
//!   repeatedly within a flush window are aggregated into a single line before being sent.
//!
//! # Sampling
//!
//! Metrics with a sample rate below 1 are passed to the client's [`Sampler`], which decides whether they are sent at
//! all. The default sampler, [`RandomSampler`], keeps each metric with a probability equal to its sample rate.
//!
//! # Errors
//!
//! Building a client can fail, and reports a [`BuildError`]. After that, sending never fails from the caller's point
//! of view: payloads that cannot be sent are dropped and logged, and counted in the client's
//! [telemetry](StatsdClient::telemetry).

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, StatsdBuilder, DEFAULT_PORT};

mod client;
pub use self::client::{StatsdClient, Timer};

mod formatter;
pub use self::formatter::LineFormatter;

mod metric;
pub use self::metric::{Metric, MetricKind, MetricValue};

mod sampler;
pub use self::sampler::{FixedSampler, RandomSampler, Sampler};

mod sender;
pub use self::sender::{SenderKind, DEFAULT_MAX_DELAY};

mod telemetry;
pub use self::telemetry::TelemetrySnapshot;

mod transport;
pub use self::transport::{resolve_endpoint, Protocol};

mod writer;
pub use self::writer::{split_lines, PayloadWriter, Payloads, WriteResult};
