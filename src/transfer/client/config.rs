use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::core::{
    COMM_TIMEOUT, DEFAULT_PACKET_COUNT, DEFAULT_PACKET_SIZE, DEFAULT_PORT, Protocol, SessionConfig,
};

/// `[send]` section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl SendConfig {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host: Some(host),
            port: Some(port),
            protocol: Some(Protocol::Stream),
            packet_size: Some(DEFAULT_PACKET_SIZE),
            packet_count: Some(DEFAULT_PACKET_COUNT),
            file: None,
            timeout: Some(COMM_TIMEOUT),
        }
    }

    /// Command line values win over the file; whatever neither sets keeps
    /// the built-in default.
    pub fn merge_cli(mut self, cli: &super::SendArgs) -> Self {
        if cli.host.is_some() {
            self.host = cli.host.clone();
        }
        self.port = cli.port.or(self.port);
        self.protocol = cli.protocol.or(self.protocol);
        self.packet_size = cli.packet_size.or(self.packet_size);
        self.packet_count = cli.packet_count.or(self.packet_count);
        if cli.file.is_some() {
            self.file = cli.file.clone();
        }
        if let Some(secs) = cli.timeout {
            self.timeout = Some(Duration::from_secs(secs));
        }
        self
    }

    pub fn into_session_config(self) -> SessionConfig {
        let protocol = self.protocol.unwrap_or(Protocol::Stream);
        let port = self.port.unwrap_or(DEFAULT_PORT);

        let mut config = SessionConfig::client(protocol, self.host.unwrap_or_default(), port)
            .with_packets(
                self.packet_size.unwrap_or(DEFAULT_PACKET_SIZE),
                self.packet_count.unwrap_or(DEFAULT_PACKET_COUNT),
            )
            .with_timeout(self.timeout.unwrap_or(COMM_TIMEOUT));
        config.file = self.file;
        config
    }
}
