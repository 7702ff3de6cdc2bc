use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::core::{COMM_TIMEOUT, DEFAULT_PORT, Protocol, SessionConfig};

/// `[recv]` section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RecvConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Inactivity budget once the first datagram has arrived
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl RecvConfig {
    pub fn new(bind: IpAddr, port: u16) -> Self {
        Self {
            bind: Some(bind),
            port: Some(port),
            protocol: Some(Protocol::Stream),
            file: None,
            timeout: Some(COMM_TIMEOUT),
        }
    }

    pub fn merge_cli(mut self, cli: &super::RecvArgs) -> Self {
        self.bind = cli.bind.or(self.bind);
        self.port = cli.port.or(self.port);
        self.protocol = cli.protocol.or(self.protocol);
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
        let mut config = SessionConfig::server(protocol, self.port.unwrap_or(DEFAULT_PORT))
            .with_bind(self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
            .with_timeout(self.timeout.unwrap_or(COMM_TIMEOUT));
        config.file = self.file;
        config
    }
}
