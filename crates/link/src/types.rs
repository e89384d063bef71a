//! Device identity types

use std::fmt;

/// Snapshot of an enumerated USB device
///
/// Captured once during enumeration and immutable afterwards. The bus
/// number and address pin down the physical device so it can be reopened
/// after an asynchronous permission grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Bus number on the host
    pub bus_number: u8,
    /// Device address on the bus
    pub address: u8,
}

impl DeviceDescriptor {
    /// Whether this device carries the given vendor/product pair
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {}, addr {})",
            self.vendor_id, self.product_id, self.bus_number, self.address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches() {
        let dev = DeviceDescriptor {
            vendor_id: 0x2341,
            product_id: 0x0043,
            bus_number: 1,
            address: 4,
        };

        assert!(dev.matches(0x2341, 0x0043));
        assert!(!dev.matches(0x2341, 0x0044));
        assert!(!dev.matches(0x16c0, 0x0043));
    }

    #[test]
    fn test_display() {
        let dev = DeviceDescriptor {
            vendor_id: 0x2341,
            product_id: 0x0043,
            bus_number: 1,
            address: 4,
        };

        assert_eq!(dev.to_string(), "2341:0043 (bus 1, addr 4)");
    }
}
