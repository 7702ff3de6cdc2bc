use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use socket2::{Domain, SockRef, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};

use super::error::{ResolveErrorKind, Result, TransferError};

const LISTEN_BACKLOG: u32 = 5;

/// Kernel receive buffer requested for datagram receivers.
const DATAGRAM_RECV_BUFFER: usize = 4 * 1024 * 1024;

/// Transport used for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Protocol {
    /// Connection-oriented, reliable byte stream (TCP)
    #[serde(rename = "tcp", alias = "stream")]
    #[value(name = "tcp", alias = "stream")]
    Stream,
    /// Connectionless datagrams (UDP)
    #[serde(rename = "udp", alias = "datagram")]
    #[value(name = "udp", alias = "datagram")]
    Datagram,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Stream => "TCP",
            Protocol::Datagram => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum SocketState {
    Closed,
    /// Client TCP socket, created but not connected yet
    Unconnected(TcpSocket),
    Listening(TcpListener),
    Connected(TcpStream),
    Datagram(UdpSocket),
}

impl SocketState {
    fn describe(&self) -> &'static str {
        match self {
            SocketState::Closed => "closed",
            SocketState::Unconnected(_) => "unconnected",
            SocketState::Listening(_) => "listening",
            SocketState::Connected(_) => "connected",
            SocketState::Datagram(_) => "datagram",
        }
    }
}

/// One side's socket and addressing.
pub struct Endpoint {
    protocol: Protocol,
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    socket: SocketState,
}

impl Endpoint {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            remote: None,
            local: None,
            socket: SocketState::Closed,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.socket, SocketState::Closed)
    }

    /// Resolves the destination and creates the client socket.
    ///
    /// `host` may be a literal address or a name to look up.
    pub async fn init_client(&mut self, host: Option<&str>, port: u16) -> Result<()> {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(TransferError::NoDestination)?;

        let ip = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => resolve(host, port).await?,
        };
        if ip.is_unspecified() {
            return Err(TransferError::NoDestination);
        }
        let remote = SocketAddr::new(ip, port);

        self.socket = match self.protocol {
            Protocol::Stream => {
                let socket = if remote.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(TransferError::SocketCreate)?;
                SocketState::Unconnected(socket)
            }
            Protocol::Datagram => {
                let any = match remote {
                    SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                };
                let socket = datagram_socket(SocketAddr::new(any, 0))?;
                self.local = socket.local_addr().ok();
                SocketState::Datagram(socket)
            }
        };
        self.remote = Some(remote);

        log::debug!("{} client socket ready for {}", self.protocol, remote);
        Ok(())
    }

    /// Creates a socket bound to `bind:port`. A stream socket is listening
    /// when this returns, so a port already taken fails here with `Bind`.
    pub async fn init_server(&mut self, bind: IpAddr, port: u16) -> Result<()> {
        let addr = SocketAddr::new(bind, port);

        self.socket = match self.protocol {
            Protocol::Stream => {
                let socket = if addr.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(TransferError::SocketCreate)?;
                socket
                    .set_reuseaddr(true)
                    .map_err(TransferError::SocketCreate)?;
                socket
                    .bind(addr)
                    .map_err(|source| TransferError::Bind { addr, source })?;
                // Linux lets two reuseaddr sockets bind one port; only one can listen
                let listener = socket
                    .listen(LISTEN_BACKLOG)
                    .map_err(|source| TransferError::Bind { addr, source })?;
                self.local = listener.local_addr().ok();
                SocketState::Listening(listener)
            }
            Protocol::Datagram => {
                let socket = datagram_socket(addr)?;
                if let Err(e) = SockRef::from(&socket).set_recv_buffer_size(DATAGRAM_RECV_BUFFER) {
                    log::warn!("Failed to set UDP receive buffer: {}", e);
                }
                self.local = socket.local_addr().ok();
                SocketState::Datagram(socket)
            }
        };

        log::info!(
            "{} socket bound to {}",
            self.protocol,
            self.local.unwrap_or(addr)
        );
        Ok(())
    }

    /// Sets the kernel send buffer of a datagram socket. Failure is not fatal.
    pub fn set_send_buffer_hint(&self, size: usize) {
        if let SocketState::Datagram(socket) = &self.socket {
            if let Err(e) = SockRef::from(socket).set_send_buffer_size(size) {
                log::warn!("Failed to set UDP send buffer to {}: {}", size, e);
            }
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        let addr = self.remote.ok_or(TransferError::NoDestination)?;
        match std::mem::replace(&mut self.socket, SocketState::Closed) {
            SocketState::Unconnected(socket) => {
                let stream = socket
                    .connect(addr)
                    .await
                    .map_err(|source| TransferError::Connect { addr, source })?;
                self.local = stream.local_addr().ok();
                self.socket = SocketState::Connected(stream);
                log::info!("Connected to {}", addr);
                Ok(())
            }
            other => {
                let state = other.describe();
                self.socket = other;
                Err(TransferError::Connect {
                    addr,
                    source: io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("socket is {}, not ready to connect", state),
                    ),
                })
            }
        }
    }

    /// Checks the socket is ready to accept a peer.
    pub fn listen(&self) -> Result<()> {
        match &self.socket {
            SocketState::Listening(_) => {
                if let Some(addr) = self.local {
                    log::info!("Listening on {}", addr);
                }
                Ok(())
            }
            other => {
                let addr = self
                    .local
                    .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
                Err(TransferError::Bind {
                    addr,
                    source: io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("socket is {}, cannot listen", other.describe()),
                    ),
                })
            }
        }
    }

    /// Waits for one peer. The listening socket is closed once it connects.
    pub async fn accept(&mut self) -> Result<SocketAddr> {
        let SocketState::Listening(listener) = &self.socket else {
            return Err(TransferError::Accept(io::Error::new(
                ErrorKind::InvalidInput,
                format!("socket is {}, not listening", self.socket.describe()),
            )));
        };

        let (stream, peer) = listener.accept().await.map_err(TransferError::Accept)?;
        self.socket = SocketState::Connected(stream);
        self.remote = Some(peer);
        Ok(peer)
    }

    /// Posts one send. Resolves to the number of bytes the transport took.
    pub async fn send(&mut self, chunk: &[u8]) -> io::Result<usize> {
        match &mut self.socket {
            SocketState::Connected(stream) => stream.write(chunk).await,
            SocketState::Datagram(socket) => {
                let remote = self
                    .remote
                    .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "no destination"))?;
                socket.send_to(chunk, remote).await
            }
            other => Err(not_ready(other)),
        }
    }

    /// Posts one receive into `buf`. Resolves to the number of bytes received;
    /// zero on a stream means the peer closed the connection.
    pub async fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.socket {
            SocketState::Connected(stream) => stream.read(buf).await,
            SocketState::Datagram(socket) => {
                let (len, peer) = socket.recv_from(buf).await?;
                if self.remote.is_none() {
                    log::info!("First datagram from {}", peer);
                    self.remote = Some(peer);
                }
                Ok(len)
            }
            other => Err(not_ready(other)),
        }
    }

    /// Closes the socket. Safe to call any number of times.
    pub fn teardown(&mut self) {
        if self.is_open() {
            log::debug!("Closing {} {} socket", self.socket.describe(), self.protocol);
        }
        self.socket = SocketState::Closed;
    }
}

fn not_ready(state: &SocketState) -> io::Error {
    io::Error::new(
        ErrorKind::NotConnected,
        format!("socket is {}", state.describe()),
    )
}

fn datagram_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, None)
        .map_err(TransferError::SocketCreate)?;
    socket
        .set_nonblocking(true)
        .map_err(TransferError::SocketCreate)?;
    socket
        .bind(&addr.into())
        .map_err(|source| TransferError::Bind { addr, source })?;
    UdpSocket::from_std(socket.into()).map_err(TransferError::SocketCreate)
}

async fn resolve(host: &str, port: u16) -> Result<IpAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransferError::Resolution {
            host: host.to_string(),
            kind: ResolveErrorKind::classify(&e),
        })?
        .collect();

    let chosen = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .ok_or_else(|| TransferError::Resolution {
            host: host.to_string(),
            kind: ResolveErrorKind::NoAddress,
        })?;

    log::debug!("Resolved {} to {}", host, chosen.ip());
    Ok(chosen.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_without_destination_fails() {
        let mut endpoint = Endpoint::new(Protocol::Stream);
        let err = endpoint.init_client(None, 7000).await.unwrap_err();
        assert!(matches!(err, TransferError::NoDestination));

        let err = endpoint.init_client(Some("   "), 7000).await.unwrap_err();
        assert!(matches!(err, TransferError::NoDestination));

        let err = endpoint.init_client(Some("0.0.0.0"), 7000).await.unwrap_err();
        assert!(matches!(err, TransferError::NoDestination));
        assert!(!endpoint.is_open());
    }

    #[tokio::test]
    async fn client_with_literal_address() {
        let mut endpoint = Endpoint::new(Protocol::Datagram);
        endpoint.init_client(Some("127.0.0.1"), 7000).await.unwrap();
        assert_eq!(
            endpoint.remote_addr(),
            Some("127.0.0.1:7000".parse().unwrap())
        );
        assert!(endpoint.is_open());
    }

    #[tokio::test]
    async fn localhost_resolves() {
        let mut endpoint = Endpoint::new(Protocol::Stream);
        endpoint.init_client(Some("localhost"), 7000).await.unwrap();
        assert!(endpoint.remote_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn second_datagram_bind_on_same_port_fails() {
        let mut first = Endpoint::new(Protocol::Datagram);
        first
            .init_server(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .unwrap();
        let port = first.local_addr().unwrap().port();

        let mut second = Endpoint::new(Protocol::Datagram);
        let err = second
            .init_server(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Bind { .. }));
    }

    #[tokio::test]
    async fn second_stream_bind_on_same_port_fails() {
        let mut first = Endpoint::new(Protocol::Stream);
        first
            .init_server(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .unwrap();
        let port = first.local_addr().unwrap().port();

        let mut second = Endpoint::new(Protocol::Stream);
        let err = second
            .init_server(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Bind { .. }));
        assert!(!second.is_open());
    }

    #[tokio::test]
    async fn listen_needs_a_server_socket() {
        let mut endpoint = Endpoint::new(Protocol::Stream);
        assert!(matches!(endpoint.listen(), Err(TransferError::Bind { .. })));

        endpoint
            .init_server(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .unwrap();
        assert!(endpoint.listen().is_ok());
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let mut endpoint = Endpoint::new(Protocol::Stream);
        endpoint
            .init_server(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .unwrap();
        endpoint.listen().unwrap();
        assert!(endpoint.is_open());

        endpoint.teardown();
        endpoint.teardown();
        assert!(!endpoint.is_open());
    }

    #[tokio::test]
    async fn send_on_closed_socket_is_not_connected() {
        let mut endpoint = Endpoint::new(Protocol::Stream);
        let err = endpoint.send(b"hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }
}
