//! USB host access: backend seam, endpoint resolution, CDC transport,
//! permission gate, and the transfer engine

pub mod endpoints;
pub mod engine;
pub mod host;
pub mod permission;
pub mod transport;

pub use endpoints::{EndpointInfo, EndpointPair, resolve_endpoints};
pub use host::{LibusbHost, UsbHost};
pub use permission::{AlwaysGranted, PermissionBroker, PermissionResponder, PermissionResult};
pub use transport::SerialTransport;
