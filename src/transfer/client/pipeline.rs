use std::io;
use std::time::Duration;

use indicatif::ProgressBar;

use crate::transfer::core::{
    Protocol, Result, Step, Termination, TransferError, TransferSession, TransferStats,
};

/// Where a [`SendPipeline`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Connecting,
    Sending,
    Done,
    Failed,
}

/// Client side of a transfer: posts one send at a time and decides on each
/// completion whether to post the next.
pub struct SendPipeline {
    session: TransferSession,
    state: SendState,
    watchdog: Duration,
    progress: ProgressBar,
}

impl SendPipeline {
    pub fn new(session: TransferSession) -> Self {
        let watchdog = session.config().timeout;
        Self {
            session,
            state: SendState::Idle,
            watchdog,
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports bytes sent to `progress` as completions arrive.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Hands the session back, torn down and ready for another run.
    pub fn into_session(self) -> TransferSession {
        self.session
    }

    /// Runs the transfer to its end. The session is torn down whatever the
    /// outcome.
    pub async fn run(&mut self) -> Result<TransferStats> {
        let result = self.drive().await;

        match &result {
            Ok(stats) => {
                self.state = SendState::Done;
                log::info!(
                    "Sent {} bytes in {}ms",
                    stats.bytes_moved,
                    stats.elapsed_ms()
                );
            }
            Err(e) => {
                self.state = SendState::Failed;
                match e.os_code() {
                    Some(code) => log::error!("Send aborted: {} (error code {})", e, code),
                    None => log::error!("Send aborted: {}", e),
                }
            }
        }

        self.progress.finish_and_clear();
        self.session.teardown();
        result
    }

    async fn drive(&mut self) -> Result<TransferStats> {
        self.session.populate_send_buffer()?;
        if let Some(target) = self.session.target_bytes() {
            self.progress.set_length(target);
        }

        match self.session.protocol() {
            Protocol::Stream => {
                self.state = SendState::Connecting;
                // The clock covers the connection attempt too
                self.session.mark_start();
                self.session.endpoint_mut().connect().await?;
            }
            Protocol::Datagram => {
                let hint = self.session.packet_size() as usize;
                self.session.endpoint().set_send_buffer_hint(hint);
                self.session.mark_start();
            }
        }

        self.state = SendState::Sending;
        self.session.activate();

        if self.session.is_complete() {
            // Nothing to send, e.g. an empty file
            self.session.finish(Termination::Completed);
        }

        while self.session.is_active() {
            let completion = self.post_send().await?;
            match self.on_send_complete(completion)? {
                Step::Repost => continue,
                Step::Finished | Step::Ignored => break,
            }
        }

        self.session.stats().ok_or_else(|| {
            TransferError::InvalidParameters("send stopped before completing".to_string())
        })
    }

    /// Posts one send under the watchdog. If the watchdog interval passes
    /// with no completion, the transfer has timed out.
    async fn post_send(&mut self) -> Result<io::Result<usize>> {
        match tokio::time::timeout(self.watchdog, self.session.send_next()).await {
            Ok(completion) => Ok(completion),
            Err(_) => {
                self.session.stop();
                Err(TransferError::Timeout(self.watchdog))
            }
        }
    }

    pub(crate) fn on_send_complete(&mut self, completion: io::Result<usize>) -> Result<Step> {
        if !self.session.is_active() {
            log::debug!("Discarding send completion for a stopped session");
            return Ok(Step::Ignored);
        }

        let sent = match completion {
            Ok(0) if self.session.protocol() == Protocol::Stream => {
                self.session.stop();
                return Err(TransferError::Send(io::Error::from(io::ErrorKind::WriteZero)));
            }
            Ok(sent) => sent,
            Err(e) => {
                self.session.stop();
                return Err(TransferError::Send(e));
            }
        };

        self.session.record_bytes(sent);
        self.progress.inc(sent as u64);
        log::trace!("Sent {} bytes, {} total", sent, self.session.bytes_moved());

        if self.session.is_complete() {
            self.session.finish(Termination::Completed);
            return Ok(Step::Finished);
        }
        Ok(Step::Repost)
    }
}
