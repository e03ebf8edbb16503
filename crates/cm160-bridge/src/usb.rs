//! libusb transport for the CM160.
//!
//! The CM160 is a CP210x USB/UART bridge. Opening it means taking interface 0
//! away from the `cp210x` kernel driver, enabling the UART and setting the line
//! rate with vendor requests, then talking to the two bulk endpoints directly.

use std::time::Duration;

use cm160_protocol::{BAUD_RATE, PRODUCT_ID, VENDOR_ID};
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType, TransferType, UsbContext};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::line_reset::SerialLineReset;
use crate::transport::{DeviceId, DeviceInfo, Transport, UsbBus};

// ============================================================================
// CP210x Vendor Requests
// ============================================================================

const CP210X_IFC_ENABLE: u8 = 0x00;
const CP210X_SET_BAUDRATE: u8 = 0x1E;
const UART_ENABLE: u16 = 0x0001;

const INTERFACE: u8 = 0;
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Bus
// ============================================================================

/// Discovers CM160 devices through libusb.
pub struct RusbBus {
    context: Context,
    line_reset: SerialLineReset,
}

impl RusbBus {
    /// Initialise libusb.
    pub fn new(line_reset: SerialLineReset) -> Result<Self, TransportError> {
        Ok(RusbBus {
            context: Context::new()?,
            line_reset,
        })
    }

    fn find(&self, id: DeviceId) -> Result<rusb::Device<Context>, TransportError> {
        self.context
            .devices()?
            .iter()
            .find(|dev| dev.bus_number() == id.bus && dev.address() == id.address)
            .ok_or(TransportError::NotFound(id))
    }
}

impl UsbBus for RusbBus {
    type Transport = RusbTransport;

    fn scan(&mut self) -> Result<Vec<DeviceInfo>, TransportError> {
        let mut found = Vec::new();
        for device in self.context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!("skipping device {:03}:{:03}: {}", device.bus_number(), device.address(), e);
                    continue;
                }
            };
            if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
                continue;
            }
            let ports = device.port_numbers().unwrap_or_default();
            found.push(DeviceInfo::new(device.bus_number(), device.address(), ports));
        }
        Ok(found)
    }

    fn open(&mut self, info: &DeviceInfo) -> Result<RusbTransport, TransportError> {
        let device = self.find(info.id)?;
        let mut transport = RusbTransport {
            id: info.id,
            handle: Some(device.open()?),
            endpoint_in: 0,
            endpoint_out: 0,
            kernel_driver_detached: false,
            claimed: false,
        };

        // On failure the transport drops here and hands the interface back.
        transport.attach(&device)?;
        transport.configure_uart()?;
        info!(
            "{}: opened (in=0x{:02x}, out=0x{:02x}, {} baud)",
            info.id, transport.endpoint_in, transport.endpoint_out, BAUD_RATE
        );
        Ok(transport)
    }

    fn reset_line(&mut self, device: &DeviceInfo) -> Result<(), TransportError> {
        let path = self.line_reset.reset(device)?;
        info!("{}: serial line {} reset", device.id, path.display());
        Ok(())
    }
}

// ============================================================================
// Transport
// ============================================================================

/// An open CM160.
pub struct RusbTransport {
    id: DeviceId,
    handle: Option<DeviceHandle<Context>>,
    endpoint_in: u8,
    endpoint_out: u8,
    kernel_driver_detached: bool,
    claimed: bool,
}

impl RusbTransport {
    fn handle(&self) -> Result<&DeviceHandle<Context>, TransportError> {
        self.handle.as_ref().ok_or(TransportError::Closed)
    }

    fn attach(&mut self, device: &rusb::Device<Context>) -> Result<(), TransportError> {
        let handle = self.handle.as_mut().ok_or(TransportError::Closed)?;

        if handle.kernel_driver_active(INTERFACE).unwrap_or(false) {
            handle.detach_kernel_driver(INTERFACE)?;
            self.kernel_driver_detached = true;
            debug!("{}: detached kernel driver", self.id);
        }

        let config = device.config_descriptor(0)?;
        if handle.active_configuration()? != config.number() {
            handle.set_active_configuration(config.number())?;
        }

        handle.claim_interface(INTERFACE)?;
        self.claimed = true;

        for interface in config.interfaces().filter(|i| i.number() == INTERFACE) {
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        Direction::In => self.endpoint_in = endpoint.address(),
                        Direction::Out => self.endpoint_out = endpoint.address(),
                    }
                }
            }
        }
        if self.endpoint_in == 0 {
            return Err(TransportError::MissingEndpoint {
                device: self.id,
                direction: "IN",
            });
        }
        if self.endpoint_out == 0 {
            return Err(TransportError::MissingEndpoint {
                device: self.id,
                direction: "OUT",
            });
        }
        Ok(())
    }

    fn configure_uart(&self) -> Result<(), TransportError> {
        let handle = self.handle()?;
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Interface);

        handle.write_control(
            request_type,
            CP210X_IFC_ENABLE,
            UART_ENABLE,
            u16::from(INTERFACE),
            &[],
            CONTROL_TIMEOUT,
        )?;
        handle.write_control(
            request_type,
            CP210X_SET_BAUDRATE,
            0,
            u16::from(INTERFACE),
            &BAUD_RATE.to_le_bytes(),
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }
}

impl Transport for RusbTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        match self.handle()?.read_bulk(self.endpoint_in, buf, timeout) {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, byte: u8, timeout: Duration) -> Result<(), TransportError> {
        self.handle()?.write_bulk(self.endpoint_out, &[byte], timeout)?;
        Ok(())
    }

    fn kernel_driver_detached(&self) -> bool {
        self.kernel_driver_detached
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        if self.claimed {
            if let Err(e) = handle.release_interface(INTERFACE) {
                result = Err(e.into());
            }
            self.claimed = false;
        }
        if self.kernel_driver_detached {
            if let Err(e) = handle.attach_kernel_driver(INTERFACE) {
                warn!("{}: failed to reattach kernel driver: {}", self.id, e);
                result = result.and(Err(e.into()));
            }
            self.kernel_driver_detached = false;
        }
        debug!("{}: closed", self.id);
        result
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}: error closing device: {}", self.id, e);
        }
    }
}
