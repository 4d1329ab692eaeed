use std::{
    fmt,
    io::{self, Write as _},
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

use bytes::{BufMut as _, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::builder::BuildError;

/// Transport protocol used to reach the collector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Connectionless UDP datagrams.
    #[default]
    Udp,

    /// A TCP stream, with each payload terminated by a newline.
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => f.write_str("udp"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

/// Resolves the collector host to an IPv4 endpoint.
///
/// Literal IPv4 addresses are used as-is. Otherwise, the host is resolved and the first IPv4 address is used.
///
/// # Errors
///
/// If the host is empty, or does not resolve to any IPv4 address, an error is returned.
pub fn resolve_endpoint(host: &str, port: u16) -> Result<SocketAddrV4, BuildError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(BuildError::MissingHost);
    }

    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(addr, port));
    }

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| BuildError::Resolution { host: host.to_string(), reason: e.to_string() })?;

    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(addr) => Some(addr),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| BuildError::Resolution {
            host: host.to_string(),
            reason: "no IPv4 address found".to_string(),
        })
}

/// Sends payloads to the collector.
///
/// A transport is owned by a single sender. Sends are attempted exactly once: failures are returned to the caller
/// and never retried here.
pub(crate) enum Transport {
    /// UDP socket connected to the collector.
    Udp(UdpSocket),

    /// Lazily (re)connected TCP stream.
    Tcp(Mutex<TcpClient>),
}

impl Transport {
    /// Creates a transport for the given endpoint.
    ///
    /// UDP sockets are bound and connected immediately. TCP streams are connected on first send.
    ///
    /// # Errors
    ///
    /// If the UDP socket cannot be bound or connected, an error is returned.
    pub fn connect(
        protocol: Protocol,
        endpoint: SocketAddrV4,
        write_timeout: Duration,
    ) -> io::Result<Self> {
        match protocol {
            Protocol::Udp => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
                socket.connect(endpoint)?;
                socket.set_write_timeout(Some(write_timeout))?;
                Ok(Transport::Udp(socket))
            }),
            Protocol::Tcp => Ok(Transport::Tcp(Mutex::new(TcpClient::new(endpoint, write_timeout)))),
        }
    }

    /// Returns the protocol of this transport.
    pub fn protocol(&self) -> Protocol {
        match self {
            Transport::Udp(_) => Protocol::Udp,
            Transport::Tcp(_) => Protocol::Tcp,
        }
    }

    /// Sends a single payload.
    ///
    /// # Errors
    ///
    /// If the payload could not be written in full, an error is returned.
    pub fn send(&self, payload: &[u8]) -> io::Result<()> {
        match self {
            Transport::Udp(socket) => {
                let written = socket.send(payload)?;
                if written != payload.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short datagram write ({written} of {} bytes)", payload.len()),
                    ));
                }
                Ok(())
            }
            Transport::Tcp(client) => client.lock().send(payload),
        }
    }
}

enum ClientState {
    // Intermediate state during send attempts.
    Inconsistent,

    // Not currently connected.
    Disconnected,

    // Connected and ready to send.
    Ready(TcpStream),
}

/// TCP connection to the collector.
///
/// Connects on first use, and drops the connection after a failed write so that the next send reconnects.
pub(crate) struct TcpClient {
    endpoint: SocketAddrV4,
    write_timeout: Duration,
    state: ClientState,
    frame_buf: BytesMut,
}

impl TcpClient {
    fn new(endpoint: SocketAddrV4, write_timeout: Duration) -> Self {
        Self { endpoint, write_timeout, state: ClientState::Disconnected, frame_buf: BytesMut::new() }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let addr = SocketAddr::new(IpAddr::V4(*self.endpoint.ip()), self.endpoint.port());
        let stream = TcpStream::connect_timeout(&addr, self.write_timeout)?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        stream.set_nodelay(true)?;
        debug!(endpoint = %self.endpoint, "Connected to collector.");
        Ok(stream)
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        // Streams have no datagram boundaries, so every payload is newline terminated to keep the last line of one
        // payload from running into the first line of the next.
        self.frame_buf.clear();
        self.frame_buf.reserve(payload.len() + 1);
        self.frame_buf.put_slice(payload);
        self.frame_buf.put_u8(b'\n');

        loop {
            let old_state = std::mem::replace(&mut self.state, ClientState::Inconsistent);
            match old_state {
                ClientState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                ClientState::Disconnected => {
                    self.state = ClientState::Disconnected;
                    let stream = self.connect()?;
                    self.state = ClientState::Ready(stream);
                }
                ClientState::Ready(mut stream) => {
                    let result = stream.write_all(&self.frame_buf);
                    self.state = if result.is_ok() {
                        ClientState::Ready(stream)
                    } else {
                        ClientState::Disconnected
                    };

                    return result;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Read as _,
        net::{Ipv4Addr, SocketAddrV4, TcpListener, UdpSocket},
        time::Duration,
    };

    use super::{resolve_endpoint, Protocol, Transport};
    use crate::builder::BuildError;

    #[test]
    fn resolve_literal_ipv4() {
        let endpoint = resolve_endpoint("10.1.2.3", 8125).unwrap();
        assert_eq!(endpoint, SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 8125));
    }

    #[test]
    fn resolve_localhost() {
        let endpoint = resolve_endpoint("localhost", 9125).unwrap();
        assert!(endpoint.ip().is_loopback());
        assert_eq!(endpoint.port(), 9125);
    }

    #[test]
    fn resolve_rejects_empty_and_ipv6_only() {
        assert!(matches!(resolve_endpoint("", 8125), Err(BuildError::MissingHost)));
        assert!(matches!(resolve_endpoint("   ", 8125), Err(BuildError::MissingHost)));
        assert!(matches!(resolve_endpoint("::1", 8125), Err(BuildError::Resolution { .. })));
    }

    #[test]
    fn udp_send() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = server.local_addr().unwrap().port();

        let transport = Transport::connect(
            Protocol::Udp,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(transport.protocol(), Protocol::Udp);
        transport.send(b"counter:1|c\ngauge:2|g").unwrap();

        let mut buf = [0u8; 512];
        let len = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"counter:1|c\ngauge:2|g");
    }

    #[test]
    fn tcp_send_terminates_payloads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = Transport::connect(
            Protocol::Tcp,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
            Duration::from_secs(1),
        )
        .unwrap();
        transport.send(b"a:1|c\nb:2|c").unwrap();
        transport.send(b"c:3|c").unwrap();
        drop(transport);

        let (mut stream, _) = listener.accept().unwrap();
        let mut received = String::new();
        stream.read_to_string(&mut received).unwrap();
        assert_eq!(received, "a:1|c\nb:2|c\nc:3|c\n");
    }

    #[test]
    fn tcp_send_fails_without_listener() {
        // Bind and immediately drop a listener to get a port that is very likely closed.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let transport = Transport::connect(
            Protocol::Tcp,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(transport.send(b"a:1|c").is_err());
    }
}
