//! Error types for the bridge.

use std::path::PathBuf;

use cm160_protocol::ProtocolError;
use thiserror::Error;

use crate::transport::DeviceId;

/// Errors from the USB transport and the serial line reset.
#[derive(Debug, Error)]
pub enum TransportError {
    /// libusb error.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error while resetting the line.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device disappeared between discovery and open.
    #[error("device {0} not found")]
    NotFound(DeviceId),

    /// The interface lacks a bulk endpoint in the given direction.
    #[error("device {device} has no bulk {direction} endpoint")]
    MissingEndpoint {
        /// Device being opened.
        device: DeviceId,
        /// "IN" or "OUT".
        direction: &'static str,
    },

    /// No tty node belongs to the device.
    #[error("no serial device node found for {0}")]
    NoSerialNode(DeviceId),

    /// The transport was already closed.
    #[error("transport closed")]
    Closed,
}

/// Conditions that end a device session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The device kept sending ID frames without progressing.
    #[error("handshake stuck after {id_count} consecutive ID frames")]
    StuckHandshake {
        /// Consecutive ID frames seen.
        id_count: u32,
    },

    /// A read from the device failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The receive buffer filled up.
    #[error("{0}")]
    BufferOverflow(ProtocolError),
}

impl SessionError {
    /// Whether the serial line must be reset before the device is reopened.
    pub fn needs_line_reset(&self) -> bool {
        matches!(self, SessionError::StuckHandshake { .. })
    }

    /// Short label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::StuckHandshake { .. } => "stuck",
            SessionError::Transport(_) => "transport",
            SessionError::BufferOverflow(_) => "overflow",
        }
    }
}

/// Errors from the reading sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The broker refused or could not be reached.
    #[error("MQTT connect to {host}:{port} failed: {reason}")]
    Connect {
        /// Broker host.
        host: String,
        /// Broker port.
        port: u16,
        /// What went wrong.
        reason: String,
    },

    /// No answer from the broker in time.
    #[error("MQTT connect to {host}:{port} timed out")]
    ConnectTimeout {
        /// Broker host.
        host: String,
        /// Broker port.
        port: u16,
    },

    /// A request could not be queued.
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The connection driver thread could not be started.
    #[error("failed to start MQTT driver: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors in configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for this schema.
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors that stop the bridge at startup.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The broker is unavailable.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// USB could not be initialised.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The signal handler could not be installed.
    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// A payload failed to serialize.
    #[error("cannot encode payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The metrics exporter failed to start.
    #[error("cannot start metrics exporter: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_reset_policy() {
        assert!(SessionError::StuckHandshake { id_count: 8 }.needs_line_reset());
        assert!(!SessionError::Transport(TransportError::Closed).needs_line_reset());
        assert_eq!(SessionError::StuckHandshake { id_count: 8 }.reason(), "stuck");
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::invalid("voltage", "must be between 1 and 500");
        assert_eq!(err.to_string(), "invalid voltage: must be between 1 and 500");

        let err = TransportError::NotFound(DeviceId { bus: 1, address: 4 });
        assert!(err.to_string().contains("001:004"));
    }
}
