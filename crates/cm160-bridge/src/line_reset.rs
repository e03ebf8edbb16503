//! Serial line reset.
//!
//! A CM160 stuck in its ID loop only recovers after the tty created by the
//! `cp210x` driver is reopened in raw mode. Once the kernel driver is
//! reattached the node shows up under the USB interface in sysfs, which is
//! how the node is found unless the operator named it.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use cm160_protocol::BAUD_RATE;
use serialport::ClearBuffer;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::DeviceInfo;

const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

/// How long to wait for the tty node after the driver is reattached.
const NODE_WAIT: Duration = Duration::from_secs(2);
const NODE_POLL: Duration = Duration::from_millis(100);

/// Finds a device's tty node and resets it.
#[derive(Debug, Clone)]
pub struct SerialLineReset {
    /// Node to reset instead of looking one up.
    override_path: Option<PathBuf>,
    /// Root of the USB device tree in sysfs.
    sysfs_root: PathBuf,
    /// Directory holding device nodes.
    dev_root: PathBuf,
}

impl SerialLineReset {
    /// Create a line reset, optionally pinned to one tty node.
    pub fn new(override_path: Option<PathBuf>) -> Self {
        SerialLineReset {
            override_path,
            sysfs_root: PathBuf::from(SYSFS_USB_DEVICES),
            dev_root: PathBuf::from("/dev"),
        }
    }

    /// Look nodes up under different roots.
    pub fn with_roots(mut self, sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = sysfs_root.into();
        self.dev_root = dev_root.into();
        self
    }

    /// Find the tty node of a device.
    pub fn locate(&self, device: &DeviceInfo) -> Result<PathBuf, TransportError> {
        if let Some(path) = &self.override_path {
            return Ok(path.clone());
        }

        let interface = self.sysfs_root.join(format!("{}:1.0", device.sysfs_name()));
        find_tty(&interface)?
            .map(|name| self.dev_root.join(name))
            .ok_or(TransportError::NoSerialNode(device.id))
    }

    /// Reopen the device's tty raw and flush both directions.
    ///
    /// Returns the node that was reset.
    pub fn reset(&self, device: &DeviceInfo) -> Result<PathBuf, TransportError> {
        let path = self.wait_for_node(device)?;
        debug!("resetting serial line {}", path.display());

        let port = serialport::new(path.to_string_lossy(), BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open()?;
        port.clear(ClearBuffer::All)?;
        Ok(path)
    }

    fn wait_for_node(&self, device: &DeviceInfo) -> Result<PathBuf, TransportError> {
        let mut waited = Duration::ZERO;
        loop {
            match self.locate(device) {
                Err(TransportError::NoSerialNode(_)) | Err(TransportError::Io(_)) if waited < NODE_WAIT => {
                    thread::sleep(NODE_POLL);
                    waited += NODE_POLL;
                }
                other => return other,
            }
        }
    }
}

/// Name of the first `ttyUSB*` entry under a sysfs interface directory.
fn find_tty(interface: &Path) -> Result<Option<String>, TransportError> {
    let mut names: Vec<String> = fs::read_dir(interface)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyUSB"))
        .collect();
    names.sort();
    Ok(names.into_iter().next())
}
