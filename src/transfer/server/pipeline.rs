use std::io;

use indicatif::ProgressBar;

use crate::transfer::core::{
    HEADER_LEN, PacketHeader, Protocol, Result, Step, Termination, TransferError, TransferSession,
    TransferStats,
};

/// Where a [`ReceivePipeline`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Idle,
    Listening,
    Receiving,
    Done,
    Failed,
}

/// Server side of a transfer: accepts (stream) or waits for the first
/// datagram, then keeps one receive posted until the transfer ends.
pub struct ReceivePipeline {
    session: TransferSession,
    state: ReceiveState,
    /// Leading bytes of the stream, kept until the header is complete
    header: Vec<u8>,
    progress: ProgressBar,
}

impl ReceivePipeline {
    pub fn new(session: TransferSession) -> Self {
        Self {
            session,
            state: ReceiveState::Idle,
            header: Vec::with_capacity(HEADER_LEN),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn into_session(self) -> TransferSession {
        self.session
    }

    /// Receives until the peer closes (stream), the expected packets have
    /// arrived (datagram) or nothing arrives within the inactivity budget
    /// (datagram). The session is torn down whatever the outcome.
    pub async fn run(&mut self) -> Result<TransferStats> {
        let result = self.drive().await;

        match &result {
            Ok(stats) => {
                self.state = ReceiveState::Done;
                log::info!(
                    "Received {} bytes in {}ms ({:?})",
                    stats.bytes_moved,
                    stats.elapsed_ms(),
                    stats.termination
                );
            }
            Err(e) => {
                self.state = ReceiveState::Failed;
                match e.os_code() {
                    Some(code) => log::error!("Receive aborted: {} (error code {})", e, code),
                    None => log::error!("Receive aborted: {}", e),
                }
            }
        }

        self.progress.finish_and_clear();
        self.header.clear();
        self.session.teardown();
        result
    }

    async fn drive(&mut self) -> Result<TransferStats> {
        self.session.open_destination()?;
        self.session.allocate_receive_buffer()?;
        self.state = ReceiveState::Listening;

        match self.session.protocol() {
            Protocol::Stream => {
                self.session.endpoint().listen()?;
                let peer = self.session.endpoint_mut().accept().await?;
                log::info!("Accepted connection from {}", peer);
                self.session.mark_start();
                // A stream ends when the peer closes it, never by inactivity
                self.session.set_inactivity(None);
            }
            Protocol::Datagram => {
                // No baseline to time out against until the first datagram
                self.session.set_inactivity(None);
            }
        }

        self.state = ReceiveState::Receiving;
        self.session.activate();

        while self.session.is_active() {
            let completion = match self.session.inactivity() {
                Some(budget) => {
                    match tokio::time::timeout(budget, self.session.receive_next()).await {
                        Ok(completion) => completion,
                        Err(_) => {
                            log::info!(
                                "Nothing received for {:?}, assuming the rest was lost",
                                budget
                            );
                            self.session.expire();
                            break;
                        }
                    }
                }
                None => self.session.receive_next().await,
            };

            match self.on_receive_complete(completion)? {
                Step::Repost => continue,
                Step::Finished | Step::Ignored => break,
            }
        }

        self.session.stats().ok_or_else(|| {
            TransferError::InvalidParameters("receive stopped before completing".to_string())
        })
    }

    pub(crate) fn on_receive_complete(&mut self, completion: io::Result<usize>) -> Result<Step> {
        if !self.session.is_active() {
            log::debug!("Discarding receive completion for a stopped session");
            return Ok(Step::Ignored);
        }

        let received = match completion {
            Ok(received) => received,
            Err(e) => {
                self.session.stop();
                return Err(TransferError::Receive(e));
            }
        };

        self.session.append_to_destination(received)?;

        if !self.session.is_file_backed() && !self.session.parameters_known() {
            self.probe_header(received);
        }

        match self.session.protocol() {
            Protocol::Stream => {
                if received == 0 {
                    log::info!("Peer closed the connection");
                    self.session.finish(Termination::PeerClosed);
                    return Ok(Step::Finished);
                }
                self.session.record_bytes(received);
            }
            Protocol::Datagram => {
                if self.session.start_time().is_none() {
                    self.session.mark_start();
                    self.session
                        .set_inactivity(Some(self.session.config().timeout));
                }
                self.session.record_bytes(received);
                self.session.touch();

                if self.session.is_complete() {
                    self.progress.inc(received as u64);
                    self.session.finish(Termination::Completed);
                    return Ok(Step::Finished);
                }
            }
        }

        self.progress.inc(received as u64);
        log::trace!(
            "Received {} bytes, {} total",
            received,
            self.session.bytes_moved()
        );
        Ok(Step::Repost)
    }

    /// Learns the packet parameters from the front of the payload. A stream
    /// may deliver the header over several reads.
    fn probe_header(&mut self, received: usize) {
        let payload = self.session.payload(received);

        let header = match self.session.protocol() {
            Protocol::Stream => {
                if self.header.len() == HEADER_LEN {
                    // Already rejected once
                    return;
                }
                accumulate_header(&mut self.header, payload)
            }
            Protocol::Datagram => {
                let header = PacketHeader::parse(payload);
                if header.is_none() {
                    log::warn!(
                        "Datagram of {} bytes is too short to carry transfer parameters",
                        received
                    );
                }
                header
            }
        };

        if let Some(header) = header {
            if header.packet_size == 0 {
                log::warn!("Ignoring header with zero packet size");
                return;
            }
            if self.session.protocol() == Protocol::Datagram
                && header.packet_size as usize != received
            {
                log::warn!(
                    "Header announces {} byte packets but the datagram carried {}",
                    header.packet_size,
                    received
                );
            }
            self.session.learn_parameters(header);
        }
    }
}

/// Appends up to the missing header bytes from `bytes` to `pending` and
/// parses the header once all of it has arrived.
fn accumulate_header(pending: &mut Vec<u8>, bytes: &[u8]) -> Option<PacketHeader> {
    let needed = HEADER_LEN.saturating_sub(pending.len());
    pending.extend_from_slice(&bytes[..needed.min(bytes.len())]);
    PacketHeader::parse(pending)
}
