//! Device access permission gate
//!
//! Some platforms interpose a user consent step between finding a device
//! and opening it. `PermissionBroker` models that step: the connector asks
//! `has_permission` first and, when the answer is no, hands the broker a
//! one-shot responder and returns without blocking. Whatever thread the
//! platform answers on calls `resolve`, which runs the connection
//! continuation there.

use crate::types::DeviceDescriptor;
use tracing::debug;

/// The answer to a permission request, produced exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionResult {
    /// The device the answer is about
    pub device: DeviceDescriptor,
    /// Whether access was granted
    pub granted: bool,
}

/// One-shot continuation for an asynchronous permission request
///
/// `resolve` consumes the responder, so a result can be delivered at most
/// once; a responder dropped unresolved simply abandons the attempt (the
/// controller stays in `AwaitingPermission` until it is stopped).
pub struct PermissionResponder {
    device: DeviceDescriptor,
    deliver: Option<Box<dyn FnOnce(PermissionResult) + Send>>,
}

impl PermissionResponder {
    pub(crate) fn new(
        device: DeviceDescriptor,
        deliver: Box<dyn FnOnce(PermissionResult) + Send>,
    ) -> Self {
        Self {
            device,
            deliver: Some(deliver),
        }
    }

    /// The device this request is about
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Deliver the grant/deny answer and run the connection continuation
    /// on the calling thread
    pub fn resolve(self, granted: bool) {
        let device = self.device.clone();
        self.resolve_as(device, granted);
    }

    /// Deliver an answer naming the device the platform actually granted.
    ///
    /// Platform prompts can come back for a different device than the one
    /// requested (the user picked another entry, or the bus changed
    /// underneath the dialog); the continuation aborts when the identity
    /// no longer matches the target.
    pub fn resolve_as(mut self, device: DeviceDescriptor, granted: bool) {
        if let Some(deliver) = self.deliver.take() {
            deliver(PermissionResult { device, granted });
        }
    }
}

impl Drop for PermissionResponder {
    fn drop(&mut self) {
        if self.deliver.is_some() {
            debug!("permission request for {} dropped without an answer", self.device);
        }
    }
}

/// Decides whether the host may open a device, and prompts when it may not
pub trait PermissionBroker: Send + Sync {
    /// Whether access to `device` is already granted
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Ask for access to the responder's device. Must not block; the
    /// answer arrives through `PermissionResponder::resolve`.
    fn request_permission(&self, responder: PermissionResponder);
}

/// Broker for hosts without a consent prompt
///
/// libusb has no permission dialog; access control happens at `open()`
/// time, where an EACCES surfaces as `LinkError::PermissionDenied`.
pub struct AlwaysGranted;

impl PermissionBroker for AlwaysGranted {
    fn has_permission(&self, _device: &DeviceDescriptor) -> bool {
        true
    }

    fn request_permission(&self, responder: PermissionResponder) {
        responder.resolve(true);
    }
}
