use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};

use crate::transfer::client::config::SendConfig;
use crate::transfer::core::DEFAULT_PORT;
use crate::transfer::server::config::RecvConfig;

/// Name of the configuration file looked up in the working directory
pub const CONFIG_FILE: &str = ".xfer.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<SendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv: Option<RecvConfig>,
}

impl AppConfig {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn generate_config_file(force: bool) -> anyhow::Result<()> {
        Self::write_config_file(CONFIG_FILE, force)
    }

    pub fn write_config_file(path: &str, force: bool) -> anyhow::Result<()> {
        if std::path::Path::new(path).exists() && !force {
            anyhow::bail!(
                "Configuration file {} already exists. Use --force to overwrite.",
                path
            );
        }

        fs::write(path, Self::generate_full_config()?)?;

        info!("Configuration file generated: {}", path);
        info!("Contains full configuration (send + recv)");
        info!("Please edit this file to customize configuration");
        Ok(())
    }

    pub fn generate_full_config() -> anyhow::Result<String> {
        let config = AppConfig {
            send: Some(SendConfig::new("127.0.0.1".to_string(), DEFAULT_PORT)),
            recv: Some(RecvConfig::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_PORT,
            )),
        };
        let toml_content = toml::to_string_pretty(&config)?;
        Ok(format!(
            "# xfer configuration file\n# All fields are optional, command line arguments override config file values\n\n{}",
            toml_content
        ))
    }
}
