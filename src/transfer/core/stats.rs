use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::endpoint::Protocol;
use super::session::Role;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// How a finished transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every expected byte was moved
    Completed,
    /// The stream peer shut the connection down
    PeerClosed,
    /// No datagram arrived within the inactivity budget
    InactivityTimeout,
}

/// Timing and counters of a finished transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferStats {
    pub role: Role,
    pub protocol: Protocol,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub packet_size: u32,
    pub packets_expected: u32,
    pub bytes_moved: u64,
    pub termination: Termination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl TransferStats {
    /// Elapsed time truncated to whole milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }

    pub fn packets_moved(&self) -> u64 {
        if self.packet_size == 0 {
            return 0;
        }
        self.bytes_moved / self.packet_size as u64
    }

    /// Average throughput in bits per second; `None` if no time elapsed.
    pub fn throughput_bps(&self) -> Option<f64> {
        let ms = self.elapsed_ms();
        if ms <= 0 {
            return None;
        }
        Some(self.bytes_moved as f64 * 8.0 * 1000.0 / ms as f64)
    }

    /// The packet report. File transfers are not packet counted, so they get
    /// none.
    pub fn report(&self) -> Option<String> {
        if self.file.is_some() {
            return None;
        }
        Some(self.to_string())
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (bytes_label, packets_label) = match self.role {
            Role::Client => ("Bytes sent", "Packets sent"),
            Role::Server => ("Bytes received", "Packets received"),
        };

        writeln!(
            f,
            "Start timestamp: {}",
            self.start_time.format(TIMESTAMP_FORMAT)
        )?;
        writeln!(f, "End timestamp: {}", self.end_time.format(TIMESTAMP_FORMAT))?;
        writeln!(f, "Transfer time: {}ms", self.elapsed_ms())?;
        writeln!(f, "Packet size: {} bytes", self.packet_size)?;
        writeln!(f, "{}: {}", bytes_label, self.bytes_moved)?;
        writeln!(f, "{}: {}", packets_label, self.packets_moved())?;
        writeln!(f, "Packets expected: {}", self.packets_expected)?;
        match self.throughput_bps() {
            Some(bps) => writeln!(f, "Throughput: {}", format_rate(bps))?,
            None => writeln!(f, "Throughput: n/a")?,
        }
        write!(f, "Protocol: {}", self.protocol)
    }
}

fn format_rate(bps: f64) -> String {
    if bps >= 1_000_000_000.0 {
        format!("{:.2} Gbit/s", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.2} Mbit/s", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.2} Kbit/s", bps / 1_000.0)
    } else {
        format!("{:.0} bit/s", bps)
    }
}
