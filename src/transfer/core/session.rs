use std::fs::File;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::buffer::{HEADER_LEN, PacketHeader, TransferBuffer};
use super::endpoint::{Endpoint, Protocol};
use super::error::{Result, TransferError};
use super::stats::{Termination, TransferStats};
use super::{
    COMM_TIMEOUT, DEFAULT_PACKET_COUNT, DEFAULT_PACKET_SIZE, DEFAULT_PORT, FILE_PACKET_SIZE,
    FILL_BYTE, MAX_DATAGRAM_PAYLOAD, RECEIVE_BUFFER_SIZE,
};

/// Which side of the transfer a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

/// Everything a session needs from the configuration step.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub protocol: Protocol,
    /// Destination host name or literal address (client only)
    pub host: Option<String>,
    /// Local address to bind (server only)
    pub bind: IpAddr,
    pub port: u16,
    /// Send source (client) or receive destination (server)
    pub file: Option<PathBuf>,
    pub packet_size: u32,
    pub packet_count: u32,
    /// Sender watchdog cadence and receiver inactivity budget
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn client(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
            ..Self::server(protocol, port)
        }
    }

    pub fn server(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            host: None,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            file: None,
            packet_size: DEFAULT_PACKET_SIZE,
            packet_count: DEFAULT_PACKET_COUNT,
            timeout: COMM_TIMEOUT,
        }
    }

    pub fn with_packets(mut self, packet_size: u32, packet_count: u32) -> Self {
        self.packet_size = packet_size;
        self.packet_count = packet_count;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self, role: Role) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(TransferError::InvalidParameters(
                "timeout must be greater than zero".to_string(),
            ));
        }
        // Servers learn the packet parameters from the sender
        if role == Role::Server || self.file.is_some() {
            return Ok(());
        }

        if self.packet_size == 0 {
            return Err(TransferError::InvalidParameters(
                "packet size must be greater than zero".to_string(),
            ));
        }
        if (self.packet_size as usize) < HEADER_LEN {
            return Err(TransferError::InvalidParameters(format!(
                "packet size must be at least {} bytes",
                HEADER_LEN
            )));
        }
        if self.packet_count == 0 {
            return Err(TransferError::InvalidParameters(
                "packet count must be at least 1".to_string(),
            ));
        }
        if self.protocol == Protocol::Datagram && self.packet_size as usize > MAX_DATAGRAM_PAYLOAD
        {
            return Err(TransferError::InvalidParameters(format!(
                "UDP packet size must not exceed {} bytes",
                MAX_DATAGRAM_PAYLOAD
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::client(Protocol::Stream, "127.0.0.1", DEFAULT_PORT)
    }
}

/// State of one transfer, owned by the pipeline that drives it.
///
/// Counters and timestamps live here rather than in any shared place; only
/// the task running the pipeline touches them, and at most one operation is
/// outstanding on the endpoint at a time.
pub struct TransferSession {
    role: Role,
    config: SessionConfig,
    endpoint: Endpoint,
    packet_size: u32,
    packet_count: u32,
    buffer: Option<TransferBuffer>,
    /// Length of the loaded source file in file mode
    file_len: Option<u64>,
    destination: Option<File>,
    bytes_moved: u64,
    start_time: Option<DateTime<Local>>,
    end_time: Option<DateTime<Local>>,
    last_completion: Option<DateTime<Local>>,
    /// `None` while there is nothing to time out against
    inactivity: Option<Duration>,
    active: bool,
    termination: Option<Termination>,
}

impl TransferSession {
    pub fn new(role: Role, config: SessionConfig) -> Result<Self> {
        config.validate(role)?;

        let (packet_size, packet_count) = match role {
            Role::Client => (config.packet_size, config.packet_count),
            Role::Server => (0, 0),
        };

        Ok(Self {
            role,
            endpoint: Endpoint::new(config.protocol),
            packet_size,
            packet_count,
            buffer: None,
            file_len: None,
            destination: None,
            bytes_moved: 0,
            start_time: None,
            end_time: None,
            last_completion: None,
            inactivity: Some(config.timeout),
            active: false,
            termination: None,
            config,
        })
    }

    /// Creates the socket: resolved and ready to connect for a client, bound
    /// for a server.
    pub async fn init(&mut self) -> Result<()> {
        match self.role {
            Role::Client => {
                self.endpoint
                    .init_client(self.config.host.as_deref(), self.config.port)
                    .await
            }
            Role::Server => {
                self.endpoint
                    .init_server(self.config.bind, self.config.port)
                    .await
            }
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Local>> {
        self.end_time
    }

    pub fn inactivity(&self) -> Option<Duration> {
        self.inactivity
    }

    pub fn set_inactivity(&mut self, budget: Option<Duration>) {
        self.inactivity = budget;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_file_backed(&self) -> bool {
        self.config.file.is_some()
    }

    #[cfg(test)]
    fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Whether the sender's packet parameters are known yet.
    pub fn parameters_known(&self) -> bool {
        self.packet_size != 0
    }

    pub fn learn_parameters(&mut self, header: PacketHeader) {
        log::info!(
            "Expecting {} packets of {} bytes",
            header.packet_count,
            header.packet_size
        );
        self.packet_count = header.packet_count;
        self.packet_size = header.packet_size;
    }

    /// Fills the send buffer from the configured file, or synthesizes one
    /// packet carrying the parameter header.
    pub fn populate_send_buffer(&mut self) -> Result<()> {
        let buffer = match &self.config.file {
            Some(path) => {
                let buffer = TransferBuffer::load_from_file(path)?;
                let len = buffer.len() as u64;
                self.packet_size = FILE_PACKET_SIZE;
                self.packet_count = (len / FILE_PACKET_SIZE as u64) as u32;
                self.file_len = Some(len);
                log::info!(
                    "Sending {} ({} bytes, {} chunks of {} bytes)",
                    path.display(),
                    len,
                    self.packet_count,
                    FILE_PACKET_SIZE
                );
                buffer
            }
            None => TransferBuffer::synthesize(FILL_BYTE, self.packet_size, self.packet_count)?,
        };
        self.buffer = Some(buffer);
        Ok(())
    }

    pub fn allocate_receive_buffer(&mut self) -> Result<()> {
        self.buffer = Some(TransferBuffer::for_receive(RECEIVE_BUFFER_SIZE)?);
        Ok(())
    }

    /// Creates (or truncates) the receive destination file, if one is set.
    pub fn open_destination(&mut self) -> Result<()> {
        if let Some(path) = &self.config.file {
            let file = File::create(path).map_err(|e| TransferError::io("create", path, e))?;
            log::info!("Writing received data to {}", path.display());
            self.destination = Some(file);
        }
        Ok(())
    }

    /// Appends the first `len` received bytes to the destination file.
    pub fn append_to_destination(&mut self, len: usize) -> Result<()> {
        let (Some(file), Some(buffer)) = (self.destination.as_mut(), self.buffer.as_ref()) else {
            return Ok(());
        };
        if let Err(e) = file.write_all(&buffer.as_slice()[..len]) {
            self.active = false;
            let path = self.config.file.clone().unwrap_or_default();
            return Err(TransferError::io("write", path, e));
        }
        Ok(())
    }

    /// The first `len` bytes of the buffer, as filled by the last receive.
    pub fn payload(&self, len: usize) -> &[u8] {
        self.buffer
            .as_ref()
            .map(|b| &b.as_slice()[..len.min(b.len())])
            .unwrap_or(&[])
    }

    /// Bytes after which the transfer is complete, once known.
    ///
    /// File mode sends the whole file; packet mode sends `packet_count`
    /// packets of `packet_size` bytes.
    pub fn target_bytes(&self) -> Option<u64> {
        if let Some(len) = self.file_len {
            return Some(len);
        }
        if self.packet_size == 0 {
            return None;
        }
        Some(self.packet_size as u64 * self.packet_count as u64)
    }

    pub fn is_complete(&self) -> bool {
        self.target_bytes()
            .is_some_and(|target| self.bytes_moved >= target)
    }

    /// Posts the next send of the session buffer.
    pub async fn send_next(&mut self) -> io::Result<usize> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "send buffer released"))?;
        let max_len = match self.config.protocol {
            Protocol::Stream => usize::MAX,
            Protocol::Datagram => self.packet_size as usize,
        };
        let chunk = buffer.chunk_at(self.bytes_moved, max_len);
        self.endpoint.send(chunk).await
    }

    /// Posts the next receive into the session buffer.
    pub async fn receive_next(&mut self) -> io::Result<usize> {
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "receive buffer released"))?;
        self.endpoint.receive(buffer.as_mut_slice()).await
    }

    pub fn record_bytes(&mut self, len: usize) {
        self.bytes_moved += len as u64;
    }

    pub fn touch(&mut self) {
        self.last_completion = Some(Local::now());
    }

    pub fn mark_start(&mut self) {
        self.start_time = Some(Local::now());
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Stops accepting completions.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Moves the session to its terminal state, stamping the end time.
    pub fn finish(&mut self, termination: Termination) {
        self.finish_at(Local::now(), termination);
    }

    /// Ends a transfer nobody is sending to any more. The end time is the
    /// last completion, not the moment the watchdog gave up.
    pub fn expire(&mut self) {
        let at = self.last_completion.unwrap_or_else(Local::now);
        self.finish_at(at, Termination::InactivityTimeout);
    }

    fn finish_at(&mut self, at: DateTime<Local>, termination: Termination) {
        self.active = false;
        if self.end_time.is_some() {
            return;
        }
        let at = match self.start_time {
            Some(start) if at < start => start,
            _ => at,
        };
        self.end_time = Some(at);
        self.termination = Some(termination);
    }

    /// Snapshot of the finished transfer. `None` until both timestamps exist.
    pub fn stats(&self) -> Option<TransferStats> {
        Some(TransferStats {
            role: self.role,
            protocol: self.config.protocol,
            start_time: self.start_time?,
            end_time: self.end_time?,
            packet_size: self.packet_size,
            packets_expected: self.packet_count,
            bytes_moved: self.bytes_moved,
            termination: self.termination?,
            file: self.config.file.clone(),
        })
    }

    /// Closes the socket, releases the buffer and destination file, and
    /// resets the counters so the session can run again.
    pub fn teardown(&mut self) {
        self.active = false;
        self.endpoint.teardown();
        if let Some(buffer) = self.buffer.take() {
            log::debug!(
                "Released {} byte {:?} buffer",
                buffer.len(),
                buffer.source()
            );
        }
        self.destination = None;
        self.file_len = None;
        self.bytes_moved = 0;
        self.start_time = None;
        self.end_time = None;
        self.last_completion = None;
        self.termination = None;
        self.inactivity = Some(self.config.timeout);
        match self.role {
            Role::Client => {
                self.packet_size = self.config.packet_size;
                self.packet_count = self.config.packet_count;
            }
            Role::Server => {
                self.packet_size = 0;
                self.packet_count = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: SessionConfig) -> TransferSession {
        TransferSession::new(Role::Client, config).unwrap()
    }

    #[test]
    fn validation_rejects_bad_packets() {
        let base = SessionConfig::client(Protocol::Stream, "127.0.0.1", 7000);

        for (size, count) in [(0, 10), (4, 10), (1024, 0)] {
            let err = base
                .clone()
                .with_packets(size, count)
                .validate(Role::Client)
                .unwrap_err();
            assert!(matches!(err, TransferError::InvalidParameters(_)));
        }

        let udp = SessionConfig::client(Protocol::Datagram, "127.0.0.1", 7000)
            .with_packets(70_000, 1);
        assert!(udp.validate(Role::Client).is_err());

        // Servers learn the parameters, so zeros are fine there
        let server = SessionConfig::server(Protocol::Stream, 7000).with_packets(0, 0);
        assert!(server.validate(Role::Server).is_ok());
    }

    #[test]
    fn file_mode_forces_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, vec![7u8; 10_000]).unwrap();

        let mut session = client(
            SessionConfig::client(Protocol::Stream, "127.0.0.1", 7000).with_file(&path),
        );
        session.populate_send_buffer().unwrap();

        assert_eq!(session.packet_size(), FILE_PACKET_SIZE);
        assert_eq!(session.packet_count(), 10_000 / FILE_PACKET_SIZE);
        // The whole file is the target, including the short final chunk
        assert_eq!(session.target_bytes(), Some(10_000));
    }

    #[test]
    fn end_time_is_set_once_and_never_before_start() {
        let mut session = client(SessionConfig::default());
        session.mark_start();
        session.activate();

        let early = session.start_time().unwrap() - chrono::TimeDelta::seconds(5);
        session.finish_at(early, Termination::Completed);
        assert_eq!(session.end_time(), session.start_time());
        assert!(!session.is_active());

        let first_end = session.end_time();
        session.finish(Termination::Completed);
        assert_eq!(session.end_time(), first_end);
    }

    #[test]
    fn teardown_resets_everything() {
        let mut session = TransferSession::new(
            Role::Server,
            SessionConfig::server(Protocol::Datagram, 7000),
        )
        .unwrap();
        session.allocate_receive_buffer().unwrap();
        session.learn_parameters(PacketHeader {
            packet_count: 10,
            packet_size: 1024,
        });
        session.set_inactivity(None);
        session.mark_start();
        session.record_bytes(2048);
        session.finish(Termination::Completed);

        session.teardown();
        assert!(!session.has_buffer());
        assert_eq!(session.bytes_moved(), 0);
        assert_eq!(session.packet_size(), 0);
        assert_eq!(session.packet_count(), 0);
        assert!(session.start_time().is_none());
        assert!(session.end_time().is_none());
        assert_eq!(session.inactivity(), Some(COMM_TIMEOUT));
        assert!(session.stats().is_none());
    }
}
