//! Notifications emitted to the controller's owner

use crate::types::DeviceDescriptor;

/// Notifications the link emits to its owner
///
/// Delivered on the channel handed out by `LinkController::events`. A
/// closed set of variants rather than a callback interface; the
/// synchronous entry points additionally return typed errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transfer engine has terminated and its thread is exiting
    UsbStopped,
    /// `connect` was called while an engine was already running
    AlreadyRunning,
    /// Enumeration finished without finding the target device
    DeviceNotFound { vendor_id: u16, product_id: u16 },
    /// The permission prompt was answered with a denial
    PermissionDenied { device: DeviceDescriptor },
}
