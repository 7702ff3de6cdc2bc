//! Transfer engine building blocks
//!
//! - `buffer`: the one buffer a session posts, and the packet header
//! - `endpoint`: socket lifecycle and addressing
//! - `session`: per-transfer state shared by the pipelines
//! - `stats`: timing, counters and the report
//! - `error`: failure taxonomy

use std::time::Duration;

mod buffer;
mod endpoint;
mod error;
mod session;
mod stats;

pub use buffer::{BufferSource, HEADER_LEN, PacketHeader, TransferBuffer};
pub use endpoint::{Endpoint, Protocol};
pub use error::{ResolveErrorKind, Result, TransferError};
pub use session::{Role, SessionConfig, TransferSession};
pub use stats::{Termination, TransferStats};

pub const DEFAULT_PORT: u16 = 7000;
pub const DEFAULT_PACKET_SIZE: u32 = 1024;
pub const DEFAULT_PACKET_COUNT: u32 = 10;

/// Chunk size used when sending a file
pub const FILE_PACKET_SIZE: u32 = 4096;

/// Watchdog cadence and default inactivity budget
pub const COMM_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram a receiver can take in one completion
pub const RECEIVE_BUFFER_SIZE: usize = 65535;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_PAYLOAD: usize = 65507;

pub(crate) const FILL_BYTE: u8 = b'a';

/// What the pipeline does after handling one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Post the next operation
    Repost,
    /// The session reached its terminal state
    Finished,
    /// The session was already stopped; the completion was discarded
    Ignored,
}
