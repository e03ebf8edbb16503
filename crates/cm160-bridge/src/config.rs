//! Command line and config file handling.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional YAML file given with `--config`
//! 3. command line flags
//!
//! ```yaml
//! host: broker.local
//! port: 1883
//! topic: power/cm160
//! announce_topic: presence
//! voltage: 230
//! debug: false
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;

/// Command line arguments.
#[derive(Parser, Debug, Default)]
#[command(name = "cm160", version, about = "Forward OWL CM160 readings to an MQTT broker")]
pub struct Cli {
    /// YAML config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// MQTT broker host.
    #[arg(long)]
    pub host: Option<String>,

    /// MQTT broker port.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Topic readings are published to.
    #[arg(long)]
    pub topic: Option<String>,

    /// Topic for online/offline announcements.
    #[arg(long)]
    pub announce_topic: Option<String>,

    /// Line voltage used to turn amps into watts.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=500))]
    pub voltage: Option<u32>,

    /// Log every frame.
    #[arg(long)]
    pub debug: bool,

    /// Bulk read timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    pub read_timeout_ms: Option<u64>,

    /// tty node to reset when a device gets stuck, instead of looking it up.
    #[arg(long, value_name = "PATH")]
    pub serial_device: Option<PathBuf>,

    /// MQTT client id.
    #[arg(long)]
    pub client_id: Option<String>,

    /// Address to serve Prometheus metrics on.
    #[arg(long, value_name = "ADDR")]
    pub metrics_listen: Option<SocketAddr>,
}

/// Resolved bridge settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// MQTT broker host.
    pub host: String,
    /// MQTT broker port.
    pub port: u16,
    /// Topic readings are published to.
    pub topic: String,
    /// Topic for online/offline announcements.
    pub announce_topic: Option<String>,
    /// Line voltage in volts.
    pub voltage: u32,
    /// Verbose logging.
    pub debug: bool,
    /// Bulk read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// tty node override for line resets.
    pub serial_device: Option<PathBuf>,
    /// MQTT client id.
    pub client_id: Option<String>,
    /// Prometheus listen address.
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            host: "localhost".to_string(),
            port: 1883,
            topic: "cm160".to_string(),
            announce_topic: None,
            voltage: 240,
            debug: false,
            read_timeout_ms: 2000,
            serial_device: None,
            client_id: None,
            metrics_listen: None,
        }
    }
}

impl BridgeConfig {
    /// Resolve settings from the command line and the file it names.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(cli);
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse YAML config text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Override with whatever was given on the command line.
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(topic) = &cli.topic {
            self.topic = topic.clone();
        }
        if let Some(topic) = &cli.announce_topic {
            self.announce_topic = Some(topic.clone());
        }
        if let Some(voltage) = cli.voltage {
            self.voltage = voltage;
        }
        if cli.debug {
            self.debug = true;
        }
        if let Some(ms) = cli.read_timeout_ms {
            self.read_timeout_ms = ms;
        }
        if let Some(path) = &cli.serial_device {
            self.serial_device = Some(path.clone());
        }
        if let Some(id) = &cli.client_id {
            self.client_id = Some(id.clone());
        }
        if let Some(addr) = cli.metrics_listen {
            self.metrics_listen = Some(addr);
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::invalid("host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "must be between 1 and 65535"));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::invalid("topic", "must not be empty"));
        }
        if matches!(&self.announce_topic, Some(t) if t.is_empty()) {
            return Err(ConfigError::invalid("announce_topic", "must not be empty"));
        }
        if !(1..=500).contains(&self.voltage) {
            return Err(ConfigError::invalid(
                "voltage",
                format!("{} is not between 1 and 500", self.voltage),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::invalid("read_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    /// Bulk read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// MQTT client id, derived from the host name when not set.
    pub fn client_id_for(&self, location: &str) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("cm160-{}", location))
    }
}
