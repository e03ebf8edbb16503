//! Transport adapter contract.
//!
//! The session manager only sees these traits. [`UsbBus`] finds and opens
//! devices; each open device is a [`Transport`] giving bounded reads and
//! single byte writes.

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;

/// Identity of an attached USB device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    /// USB bus number.
    pub bus: u8,
    /// Device address on the bus.
    pub address: u8,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// A device found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bus and address.
    pub id: DeviceId,
    /// Hub port chain from the root hub.
    pub ports: Vec<u8>,
}

impl DeviceInfo {
    /// Create device info.
    pub fn new(bus: u8, address: u8, ports: Vec<u8>) -> Self {
        DeviceInfo {
            id: DeviceId { bus, address },
            ports,
        }
    }

    /// Name of the device under `/sys/bus/usb/devices`, e.g. `1-1.4`.
    pub fn sysfs_name(&self) -> String {
        let ports: Vec<String> = self.ports.iter().map(|p| p.to_string()).collect();
        format!("{}-{}", self.id.bus, ports.join("."))
    }
}

/// An open connection to one device.
pub trait Transport {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// A timeout is not an error and returns `Ok(0)`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Write one byte to the device.
    fn write(&mut self, byte: u8, timeout: Duration) -> Result<(), TransportError>;

    /// Whether the OS driver was detached when the device was opened.
    fn kernel_driver_detached(&self) -> bool;

    /// Release the device and give it back to the OS driver.
    ///
    /// Calling this more than once is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Device discovery and recovery.
pub trait UsbBus {
    /// Connection type produced by [`UsbBus::open`].
    type Transport: Transport;

    /// List the CM160 devices currently attached.
    fn scan(&mut self) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Open and configure a device.
    fn open(&mut self, device: &DeviceInfo) -> Result<Self::Transport, TransportError>;

    /// Reset the serial line of a closed device so it can be reopened.
    fn reset_line(&mut self, device: &DeviceInfo) -> Result<(), TransportError>;
}
