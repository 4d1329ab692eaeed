use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::debug;

use crate::{
    client::StatsdClient,
    formatter::LineFormatter,
    sampler::{RandomSampler, Sampler},
    sender::{Pipeline, Sender, SenderKind},
    telemetry::Telemetry,
    transport::{resolve_endpoint, Protocol, Transport},
};

/// Default collector port.
pub const DEFAULT_PORT: u16 = 8125;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 512;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that could occur while building a client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No collector host was configured.
    #[error("collector host must not be empty")]
    MissingHost,

    /// The collector port was zero.
    #[error("collector port must not be zero")]
    InvalidPort,

    /// The collector host did not resolve to an IPv4 address.
    #[error("failed to resolve collector host '{host}': {reason}")]
    Resolution {
        /// The host that failed to resolve.
        host: String,

        /// Details about the resolution failure.
        reason: String,
    },

    /// The transport could not be created.
    #[error("failed to create transport: {0}")]
    Transport(#[from] std::io::Error),

    /// Failed to spawn the background worker threads.
    #[error("failed to spawn background worker threads")]
    Backend,
}

/// Builder for a [`StatsdClient`].
pub struct StatsdBuilder {
    host: String,
    port: u16,
    protocol: Protocol,
    max_payload_len: usize,
    prefix: Option<String>,
    write_timeout: Duration,
    sender: SenderKind,
    shutdown_timeout: Duration,
    sampler: Arc<dyn Sampler>,
}

impl StatsdBuilder {
    /// Creates a new `StatsdBuilder` targeting the given collector host.
    ///
    /// The host can be either a literal IPv4 address or a hostname. Hostnames are resolved when the client is built,
    /// and the first IPv4 address is used.
    pub fn new<H>(host: H) -> Self
    where
        H: Into<String>,
    {
        StatsdBuilder {
            host: host.into(),
            port: DEFAULT_PORT,
            protocol: Protocol::Udp,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            prefix: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            sender: SenderKind::Immediate,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            sampler: Arc::new(RandomSampler),
        }
    }

    /// Set the collector port.
    ///
    /// Defaults to 8125.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the transport protocol.
    ///
    /// Defaults to [`Protocol::Udp`].
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the maximum payload length.
    ///
    /// Metric lines are packed into payloads of at most this many bytes, splitting between lines but never within one.
    /// A single line longer than the limit is still sent, by itself, and may be dropped by the network or the
    /// collector. A value of zero means payloads are unbounded.
    ///
    /// This should generally match what the network path and collector can accept in one datagram.
    ///
    /// Defaults to 512 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Set the namespace prefix prepended, with a dot, to every metric name.
    ///
    /// Trailing dots are trimmed.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the write timeout for the transport.
    ///
    /// When the write timeout is reached, the payload being sent at the time is dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the sender strategy.
    ///
    /// See [`SenderKind`] for the available strategies.
    ///
    /// Defaults to [`SenderKind::Immediate`].
    #[must_use]
    pub fn with_sender(mut self, sender: SenderKind) -> Self {
        self.sender = sender;
        self
    }

    /// Set how long shutdown waits for background workers to stop.
    ///
    /// Workers that have not stopped by then are left to finish on their own.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the sampler used to decide whether metrics with a sample rate below 1 are sent.
    ///
    /// Defaults to [`RandomSampler`].
    #[must_use]
    pub fn with_sampler<S>(mut self, sampler: S) -> Self
    where
        S: Sampler + 'static,
    {
        self.sampler = Arc::new(sampler);
        self
    }

    /// Builds the client.
    ///
    /// The collector host is resolved, the transport is created and, for the background sender, the worker threads
    /// are spawned.
    ///
    /// # Errors
    ///
    /// If the host is empty or cannot be resolved to an IPv4 address, the port is zero, the transport cannot be
    /// created, or the worker threads cannot be spawned, an error is returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        if self.port == 0 {
            return Err(BuildError::InvalidPort);
        }

        let endpoint = resolve_endpoint(&self.host, self.port)?;
        let transport = Transport::connect(self.protocol, endpoint, self.write_timeout)?;
        debug!(%endpoint, protocol = %self.protocol, "Created transport.");

        let telemetry = Arc::new(Telemetry::default());
        let pipeline = Arc::new(Pipeline::new(
            LineFormatter::new(self.prefix.as_deref()),
            transport,
            self.max_payload_len,
            Arc::clone(&telemetry),
        ));

        let sender = Sender::new(&self.sender, pipeline, self.shutdown_timeout)?;

        Ok(StatsdClient::new(sender, self.sampler, telemetry))
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, StatsdBuilder};

    #[test]
    fn missing_host() {
        assert!(matches!(StatsdBuilder::new("").build(), Err(BuildError::MissingHost)));
    }

    #[test]
    fn zero_port() {
        assert!(matches!(
            StatsdBuilder::new("127.0.0.1").with_port(0).build(),
            Err(BuildError::InvalidPort)
        ));
    }

    #[test]
    fn unresolvable_host() {
        let result = StatsdBuilder::new("no-such-host.invalid").build();
        assert!(matches!(result, Err(BuildError::Resolution { .. })));
    }

    #[test]
    fn error_messages() {
        let error = BuildError::Resolution { host: "collector".to_string(), reason: "boom".to_string() };
        assert_eq!(error.to_string(), "failed to resolve collector host 'collector': boom");
        assert_eq!(BuildError::MissingHost.to_string(), "collector host must not be empty");
    }
}
