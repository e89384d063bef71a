//! USB host backend
//!
//! `UsbHost` is the enumeration/open seam the connector runs against. The
//! libusb implementation is the only one shipped; tests substitute a mock
//! that serves scripted devices and transports.

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::types::DeviceDescriptor;
use crate::usb::endpoints::{describe_interface, resolve_endpoints};
use crate::usb::transport::{SerialTransport, UsbSerialTransport, configure_line};
use rusb::{Context, UsbContext};
use tracing::{debug, warn};

/// Host-side USB access: enumerate attached devices and open one of them
pub trait UsbHost: Send + Sync {
    /// Snapshot of all attached devices, in enumeration order
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open `device`, claim its serial interface, apply line coding, and
    /// resolve the bulk endpoint pair
    fn open(
        &self,
        device: &DeviceDescriptor,
        config: &LinkConfig,
    ) -> Result<Box<dyn SerialTransport>>;
}

/// libusb-backed host
pub struct LibusbHost {
    context: Context,
}

impl LibusbHost {
    pub fn new() -> Result<Self> {
        let context = Context::new()?;
        Ok(Self { context })
    }
}

impl UsbHost for LibusbHost {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();

        for device in self.context.devices()?.iter() {
            match device.device_descriptor() {
                Ok(descriptor) => devices.push(DeviceDescriptor {
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                    bus_number: device.bus_number(),
                    address: device.address(),
                }),
                Err(e) => {
                    warn!(
                        "skipping device on bus {} addr {}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                }
            }
        }

        debug!("enumerated {} devices", devices.len());
        Ok(devices)
    }

    fn open(
        &self,
        device: &DeviceDescriptor,
        config: &LinkConfig,
    ) -> Result<Box<dyn SerialTransport>> {
        let interface = config.device.interface;

        let target = self
            .context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == device.bus_number && d.address() == device.address)
            .ok_or(LinkError::DeviceNotFound {
                vendor_id: device.vendor_id,
                product_id: device.product_id,
            })?;

        let handle = target.open().map_err(|e| match e {
            rusb::Error::Access => LinkError::PermissionDenied(device.clone()),
            other => LinkError::Usb(other),
        })?;
        debug!("opened device {}", device);

        // Force-disconnect the kernel driver so the claim is exclusive
        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("detaching kernel driver from interface {}", interface);
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    warn!("failed to detach kernel driver: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!("could not check kernel driver on interface {}: {}", interface, e);
            }
        }

        if let Err(e) = handle.claim_interface(interface) {
            warn!("failed to claim interface {}: {}", interface, e);
            return Err(LinkError::InterfaceClaimFailed { interface });
        }
        debug!("claimed interface {} on {}", interface, device);

        configure_line(&handle, interface, &config.serial, config.io_timeout())?;

        let config_descriptor = target.active_config_descriptor()?;
        let endpoints = config_descriptor
            .interfaces()
            .find(|i| i.number() == interface)
            .and_then(|i| i.descriptors().next())
            .map(|descriptor| describe_interface(&descriptor))
            .ok_or(LinkError::EndpointsNotFound { interface })?;
        let pair = resolve_endpoints(interface, &endpoints)?;
        debug!(
            "resolved endpoints on {}: IN {:#04x}, OUT {:#04x}",
            device, pair.bulk_in, pair.bulk_out
        );

        Ok(Box::new(UsbSerialTransport::new(handle, interface, pair)))
    }
}
