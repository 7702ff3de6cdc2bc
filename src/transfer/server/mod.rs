//! Receiving side
//!
//! Over TCP the receiver accepts one connection and reads until the sender
//! closes it. Over UDP it learns the packet size and count from the header
//! of the first datagram and stops once they have all arrived, or once
//! nothing has arrived for the timeout interval.
//!
//! # Command Line Usage
//!
//! ```bash
//! # TCP on the default port
//! xfer recv
//!
//! # UDP on port 9000, giving up after 2 seconds of silence
//! xfer recv -P udp -p 9000 -t 2
//!
//! # Store whatever arrives
//! xfer recv -f received.bin
//! ```

pub mod config;
mod pipeline;

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::core::{Protocol, Role, TransferSession};
use crate::transfer::print_outcome;

pub use config::RecvConfig;
pub use pipeline::{ReceivePipeline, ReceiveState};

#[derive(Args, Debug, Clone, Default)]
pub struct RecvArgs {
    /// Local address to bind [default: 0.0.0.0]
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Local port [default: 7000]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Transport protocol [default: tcp]
    #[arg(short = 'P', long, value_enum)]
    pub protocol: Option<Protocol>,

    /// Write received data to this file
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// UDP inactivity timeout in seconds [default: 5]
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Print the stats as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the recv command with an optional `[recv]` config section
pub fn run_with_config(args: RecvArgs, config: Option<&RecvConfig>) -> Result<()> {
    let recv_config = config.cloned().unwrap_or_default().merge_cli(&args);
    let session_config = recv_config.into_session_config();

    log::info!(
        "Receiving on {}:{} over {}",
        session_config.bind,
        session_config.port,
        session_config.protocol
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let stats = runtime.block_on(async move {
        let mut session = TransferSession::new(Role::Server, session_config)?;
        session.init().await?;

        let mut pipeline = ReceivePipeline::new(session).with_progress(spinner());
        pipeline.run().await
    })?;

    print_outcome(&stats, args.json)
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} {bytes} received ({binary_bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
