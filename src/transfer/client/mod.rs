//! Sending side
//!
//! Sends either `count` synthesized packets of `size` bytes, each starting
//! with the 8-byte parameter header, or a whole file in 4096-byte chunks.
//!
//! # Command Line Usage
//!
//! ```bash
//! # 10 packets of 1024 bytes over TCP
//! xfer send 192.168.1.100
//!
//! # 500 packets of 8 KiB over UDP
//! xfer send 192.168.1.100 -P udp -s 8192 -n 500
//!
//! # A file
//! xfer send 192.168.1.100 -f image.iso
//! ```

pub mod config;
mod pipeline;

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use crate::transfer::core::{Role, TransferSession};
use crate::transfer::print_outcome;

pub use config::SendConfig;
pub use pipeline::{SendPipeline, SendState};

#[derive(Args, Debug, Clone, Default)]
pub struct SendArgs {
    /// Destination IP address or host name
    #[arg(value_name = "HOST")]
    pub host: Option<String>,

    /// Destination port [default: 7000]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Transport protocol [default: tcp]
    #[arg(short = 'P', long, value_enum)]
    pub protocol: Option<crate::transfer::core::Protocol>,

    /// Packet size in bytes [default: 1024]
    #[arg(short = 's', long)]
    pub packet_size: Option<u32>,

    /// Number of packets to send [default: 10]
    #[arg(short = 'n', long)]
    pub packet_count: Option<u32>,

    /// Send this file instead of synthesized packets
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Watchdog timeout in seconds [default: 5]
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Print the stats as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the send command with an optional `[send]` config section
pub fn run_with_config(args: SendArgs, config: Option<&SendConfig>) -> Result<()> {
    let send_config = config.cloned().unwrap_or_default().merge_cli(&args);
    let session_config = send_config.into_session_config();

    log::info!(
        "Sending to {}:{} over {}",
        session_config.host.as_deref().unwrap_or("unknown"),
        session_config.port,
        session_config.protocol
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let stats = runtime.block_on(async move {
        let mut session = TransferSession::new(Role::Client, session_config)?;
        session.init().await?;

        let mut pipeline = SendPipeline::new(session).with_progress(progress_bar());
        pipeline.run().await
    })?;

    print_outcome(&stats, args.json)
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {bytes}/{total_bytes} ({percent}%) [{bar:40.cyan/blue}] {binary_bytes_per_sec}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb
}
