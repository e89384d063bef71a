//! Link error types

use crate::types::DeviceDescriptor;
use thiserror::Error;

/// Errors surfaced by the connection lifecycle and the transfer engine
///
/// All of these are terminal for the current connection attempt; the
/// controller never retries on its own.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No enumerated device carries the configured vendor/product pair
    #[error("no attached device matches {vendor_id:04x}:{product_id:04x}")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// The user or platform refused access to the device
    #[error("permission denied for device {0}")]
    PermissionDenied(DeviceDescriptor),

    /// Exclusive access to the serial interface could not be obtained
    #[error("could not claim exclusive access to interface {interface}")]
    InterfaceClaimFailed { interface: u8 },

    /// The claimed interface exposes no bulk endpoint pair
    #[error("interface {interface} has no bulk IN/OUT endpoint pair")]
    EndpointsNotFound { interface: u8 },

    /// A bulk transfer failed on the bus
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// A transfer engine is already running; `stop()` first
    #[error("transfer engine is already running")]
    AlreadyRunning,

    /// The controller is not in the `Connected` phase
    #[error("not connected")]
    NotConnected,

    /// The engine request or completion channel broke down
    #[error("channel error: {0}")]
    Channel(String),

    /// The configuration failed validation
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the underlying USB stack
    #[error("usb error: {0}")]
    Usb(#[from] rusb::Error),
}

/// Type alias for link results
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_not_found_display() {
        let err = LinkError::DeviceNotFound {
            vendor_id: 0x2341,
            product_id: 0x0043,
        };
        assert_eq!(err.to_string(), "no attached device matches 2341:0043");
    }

    #[test]
    fn test_rusb_error_conversion() {
        let err: LinkError = rusb::Error::Busy.into();
        assert!(matches!(err, LinkError::Usb(rusb::Error::Busy)));
    }

    #[test]
    fn test_permission_denied_names_the_device() {
        let err = LinkError::PermissionDenied(DeviceDescriptor {
            vendor_id: 0x2341,
            product_id: 0x0043,
            bus_number: 3,
            address: 7,
        });
        let msg = err.to_string();
        assert!(msg.contains("2341:0043"));
        assert!(msg.contains("bus 3"));
    }
}
