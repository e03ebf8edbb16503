//! Bridge from OWL CM160 power monitors to an MQTT broker.
//!
//! The [`SessionManager`] finds CM160 devices on the USB bus, runs the
//! handshake through [`cm160_protocol::FrameEngine`], and hands each reading
//! to a [`ReadingSink`] as JSON. Devices are polled from a single loop; a
//! device that fails or stops answering is torn down and picked up again by
//! the next discovery pass.
//!
//! The bus and sink are traits so the loop can be driven without hardware:
//! [`RusbBus`] and [`MqttSink`] are the real implementations.

pub mod config;
pub mod error;
pub mod line_reset;
pub mod manager;
pub mod metrics;
pub mod reading;
pub mod session;
pub mod sink;
pub mod transport;
pub mod usb;

pub use config::{BridgeConfig, Cli};
pub use error::{BridgeError, ConfigError, SessionError, SinkError, TransportError};
pub use line_reset::SerialLineReset;
pub use manager::{ManagerConfig, SessionManager};
pub use reading::{AnnounceMessage, Origin, Reading, ReadingMessage};
pub use session::{DeviceSession, Publisher, SessionStats};
pub use sink::{MqttSettings, MqttSink, ReadingSink};
pub use transport::{DeviceId, DeviceInfo, Transport, UsbBus};
pub use usb::{RusbBus, RusbTransport};
