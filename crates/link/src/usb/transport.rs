//! Serial transport over bulk endpoints
//!
//! `SerialTransport` is the seam between the transfer engine and the bus:
//! the engine performs exactly one blocking call on it per wake-up. The
//! real implementation wraps an open rusb handle with a claimed interface
//! and a resolved endpoint pair; tests substitute their own.

use crate::config::{Parity, SerialSettings};
use crate::error::Result;
use crate::usb::endpoints::EndpointPair;
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// CDC SET_LINE_CODING class request
const SET_LINE_CODING: u8 = 0x20;
/// CDC SET_CONTROL_LINE_STATE class request
const SET_CONTROL_LINE_STATE: u8 = 0x22;
/// bmRequestType: host-to-device, class, interface recipient
const REQUEST_TYPE_CLASS_INTERFACE: u8 = 0x21;

/// Blocking byte transport over a claimed serial interface
pub trait SerialTransport: Send {
    /// Write a single byte to the bulk OUT endpoint, returning the number
    /// of bytes accepted by the device
    fn write_byte(&mut self, data: u8, timeout: Duration) -> Result<usize>;

    /// Read from the bulk IN endpoint into `buf`, returning the number of
    /// bytes received. A timeout is not an error; it reads as zero bytes
    /// ("no data").
    fn read_bulk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Encode CDC line coding as the 7-byte SET_LINE_CODING payload:
/// little-endian baud rate, stop bits, parity, data bits.
pub fn encode_line_coding(serial: &SerialSettings) -> [u8; 7] {
    let baud = serial.baud_rate.to_le_bytes();
    // Wire encoding: 0 = 1 stop bit, 1 = 1.5, 2 = 2 stop bits
    let stop_bits = match serial.stop_bits {
        2 => 2,
        _ => 0,
    };
    let parity = match serial.parity {
        Parity::None => 0,
        Parity::Odd => 1,
        Parity::Even => 2,
    };
    [
        baud[0],
        baud[1],
        baud[2],
        baud[3],
        stop_bits,
        parity,
        serial.data_bits,
    ]
}

/// Issue the two CDC setup requests on a claimed interface: control line
/// state, then line coding. Must run before any bulk traffic.
pub(crate) fn configure_line(
    handle: &DeviceHandle<Context>,
    interface: u8,
    serial: &SerialSettings,
    timeout: Duration,
) -> Result<()> {
    debug!("setting control line state on interface {}", interface);
    handle.write_control(
        REQUEST_TYPE_CLASS_INTERFACE,
        SET_CONTROL_LINE_STATE,
        0,
        interface as u16,
        &[],
        timeout,
    )?;

    let coding = encode_line_coding(serial);
    debug!("setting line coding {:02x?} on interface {}", coding, interface);
    handle.write_control(
        REQUEST_TYPE_CLASS_INTERFACE,
        SET_LINE_CODING,
        0,
        interface as u16,
        &coding,
        timeout,
    )?;

    Ok(())
}

/// rusb-backed transport owning the open device handle
///
/// Holds the claimed interface for its whole lifetime; dropping it releases
/// the interface and hands the device back to the kernel driver.
pub struct UsbSerialTransport {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoints: EndpointPair,
}

impl UsbSerialTransport {
    pub(crate) fn new(handle: DeviceHandle<Context>, interface: u8, endpoints: EndpointPair) -> Self {
        Self {
            handle,
            interface,
            endpoints,
        }
    }
}

impl SerialTransport for UsbSerialTransport {
    fn write_byte(&mut self, data: u8, timeout: Duration) -> Result<usize> {
        let written = self
            .handle
            .write_bulk(self.endpoints.bulk_out, &[data], timeout)?;
        Ok(written)
    }

    fn read_bulk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.handle.read_bulk(self.endpoints.bulk_in, buf, timeout) {
            Ok(len) => Ok(len),
            // The device had nothing queued; callers read this as "no data"
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for UsbSerialTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            warn!("failed to release interface {}: {}", self.interface, e);
        }
        if let Err(e) = self.handle.attach_kernel_driver(self.interface) {
            debug!(
                "could not reattach kernel driver to interface {} (may not have been detached): {}",
                self.interface, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_coding_9600_8n1() {
        let serial = SerialSettings {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        };

        // 9600 = 0x2580 little-endian
        assert_eq!(
            encode_line_coding(&serial),
            [0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]
        );
    }

    #[test]
    fn test_line_coding_115200_7e2() {
        let serial = SerialSettings {
            baud_rate: 115200,
            data_bits: 7,
            stop_bits: 2,
            parity: Parity::Even,
        };

        assert_eq!(
            encode_line_coding(&serial),
            [0x00, 0xc2, 0x01, 0x00, 0x02, 0x02, 0x07]
        );
    }
}
