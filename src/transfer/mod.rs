//! Bulk TCP/UDP transfer engine
//!
//! A client pushes either synthesized packets or a file to a server, which
//! receives until the transfer ends and reports timing and throughput.
//!
//! ## Module Layout
//!
//! ```text
//! transfer/
//! ├── core/           # Engine building blocks
//! │   ├── buffer      # Transfer buffer and packet header
//! │   ├── endpoint    # Socket lifecycle and addressing
//! │   ├── session     # Per-transfer state
//! │   ├── stats       # Timing, counters and report
//! │   └── error       # Failure taxonomy
//! │
//! ├── client/         # Sending side
//! │   ├── pipeline    # Send loop
//! │   └── config      # [send] config section
//! │
//! └── server/         # Receiving side
//!     ├── pipeline    # Receive loop
//!     └── config      # [recv] config section
//! ```
//!
//! ## Wire Format
//!
//! In packet mode every packet is `packet_size` bytes. The first 8 bytes
//! hold the packet count and then the packet size, both little-endian `u32`;
//! the rest is filler. File mode sends the raw file contents.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use xfer::transfer::client::SendPipeline;
//! use xfer::transfer::core::{Protocol, Role, SessionConfig, TransferSession};
//!
//! # async fn run() -> xfer::transfer::core::Result<()> {
//! let config = SessionConfig::client(Protocol::Datagram, "192.168.1.100", 7000)
//!     .with_packets(8192, 500);
//! let mut session = TransferSession::new(Role::Client, config)?;
//! session.init().await?;
//!
//! let stats = SendPipeline::new(session).run().await?;
//! println!("{}", stats);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod core;
pub mod server;

use self::core::TransferStats;

/// Prints the outcome of a finished transfer.
///
/// Packet-mode transfers print the full report (or JSON); file transfers
/// only log a summary line.
pub(crate) fn print_outcome(stats: &TransferStats, json: bool) -> anyhow::Result<()> {
    if stats.file.is_some() {
        info!(
            "{} bytes in {}ms",
            stats.bytes_moved,
            stats.elapsed_ms()
        );
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else if let Some(report) = stats.report() {
        println!("{}", report);
    }
    Ok(())
}
