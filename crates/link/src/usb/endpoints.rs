//! Bulk endpoint resolution
//!
//! Classifies the endpoints of a claimed interface and picks the bulk pair
//! used for serial data. Kept independent of rusb descriptor types so the
//! scan is testable without hardware; `describe_interface` bridges from a
//! live descriptor.

use crate::error::{LinkError, Result};
use tracing::debug;

/// Transfer direction of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// USB transfer kind of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint on an interface, as far as resolution cares
#[derive(Debug, Clone, Copy)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit
    pub address: u8,
    pub direction: EndpointDirection,
    pub kind: EndpointKind,
}

/// Addresses of the resolved bulk endpoint pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    /// Bulk IN endpoint address
    pub bulk_in: u8,
    /// Bulk OUT endpoint address
    pub bulk_out: u8,
}

/// Pick the serial bulk pair from an interface's endpoints.
///
/// The first bulk device-to-host endpoint becomes IN and the first bulk
/// host-to-device endpoint becomes OUT; everything else is ignored. A
/// partial pair is unusable, so missing either direction is an error and
/// the caller must abort connection setup.
pub fn resolve_endpoints(interface: u8, endpoints: &[EndpointInfo]) -> Result<EndpointPair> {
    let mut bulk_in = None;
    let mut bulk_out = None;

    for endpoint in endpoints {
        if endpoint.kind != EndpointKind::Bulk {
            continue;
        }
        match endpoint.direction {
            EndpointDirection::In => {
                if bulk_in.is_none() {
                    debug!("bulk IN endpoint at {:#04x}", endpoint.address);
                    bulk_in = Some(endpoint.address);
                }
            }
            EndpointDirection::Out => {
                if bulk_out.is_none() {
                    debug!("bulk OUT endpoint at {:#04x}", endpoint.address);
                    bulk_out = Some(endpoint.address);
                }
            }
        }
    }

    match (bulk_in, bulk_out) {
        (Some(bulk_in), Some(bulk_out)) => Ok(EndpointPair { bulk_in, bulk_out }),
        _ => Err(LinkError::EndpointsNotFound { interface }),
    }
}

/// Flatten a live interface descriptor into `EndpointInfo` records
pub fn describe_interface(descriptor: &rusb::InterfaceDescriptor<'_>) -> Vec<EndpointInfo> {
    descriptor
        .endpoint_descriptors()
        .map(|ep| EndpointInfo {
            address: ep.address(),
            direction: match ep.direction() {
                rusb::Direction::In => EndpointDirection::In,
                rusb::Direction::Out => EndpointDirection::Out,
            },
            kind: match ep.transfer_type() {
                rusb::TransferType::Control => EndpointKind::Control,
                rusb::TransferType::Isochronous => EndpointKind::Isochronous,
                rusb::TransferType::Bulk => EndpointKind::Bulk,
                rusb::TransferType::Interrupt => EndpointKind::Interrupt,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(address: u8, direction: EndpointDirection, kind: EndpointKind) -> EndpointInfo {
        EndpointInfo {
            address,
            direction,
            kind,
        }
    }

    #[test]
    fn test_resolves_bulk_pair() {
        let endpoints = [
            ep(0x81, EndpointDirection::In, EndpointKind::Bulk),
            ep(0x02, EndpointDirection::Out, EndpointKind::Bulk),
        ];

        let pair = resolve_endpoints(0, &endpoints).unwrap();
        assert_eq!(pair.bulk_in, 0x81);
        assert_eq!(pair.bulk_out, 0x02);
    }

    #[test]
    fn test_ignores_interrupt_endpoints() {
        // CDC data interfaces usually sit next to an interrupt notification
        // endpoint; it must never be picked as either side of the pair.
        let endpoints = [
            ep(0x83, EndpointDirection::In, EndpointKind::Interrupt),
            ep(0x81, EndpointDirection::In, EndpointKind::Bulk),
            ep(0x02, EndpointDirection::Out, EndpointKind::Bulk),
        ];

        let pair = resolve_endpoints(0, &endpoints).unwrap();
        assert_eq!(pair.bulk_in, 0x81);
    }

    #[test]
    fn test_first_match_wins() {
        let endpoints = [
            ep(0x81, EndpointDirection::In, EndpointKind::Bulk),
            ep(0x02, EndpointDirection::Out, EndpointKind::Bulk),
            ep(0x84, EndpointDirection::In, EndpointKind::Bulk),
            ep(0x05, EndpointDirection::Out, EndpointKind::Bulk),
        ];

        let pair = resolve_endpoints(0, &endpoints).unwrap();
        assert_eq!(pair.bulk_in, 0x81);
        assert_eq!(pair.bulk_out, 0x02);
    }

    #[test]
    fn test_missing_in_direction_fails() {
        let endpoints = [
            ep(0x02, EndpointDirection::Out, EndpointKind::Bulk),
            ep(0x83, EndpointDirection::In, EndpointKind::Interrupt),
        ];

        let err = resolve_endpoints(1, &endpoints).unwrap_err();
        assert!(matches!(err, LinkError::EndpointsNotFound { interface: 1 }));
    }

    #[test]
    fn test_missing_out_direction_fails() {
        let endpoints = [ep(0x81, EndpointDirection::In, EndpointKind::Bulk)];

        assert!(resolve_endpoints(0, &endpoints).is_err());
    }

    #[test]
    fn test_empty_interface_fails() {
        assert!(resolve_endpoints(0, &[]).is_err());
    }
}
