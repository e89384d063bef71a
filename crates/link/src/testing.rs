//! Test support
//!
//! Mock host, transport, and permission broker used by the unit and
//! integration tests. Compiled unconditionally so integration tests and
//! downstream consumers can drive the controller without hardware.

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::types::DeviceDescriptor;
use crate::usb::host::UsbHost;
use crate::usb::permission::{PermissionBroker, PermissionResponder};
use crate::usb::transport::SerialTransport;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Build a descriptor for tests (bus 1, address 1)
pub fn descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id,
        product_id,
        bus_number: 1,
        address: 1,
    }
}

/// Scripted in-memory transport
///
/// Writes accumulate in `written`; reads pop pre-scripted buffers and
/// report "no data" once the script runs dry. All state lives behind
/// `Arc`s, so clones observe the same bytes — `MockHost` hands a clone to
/// every engine it opens while the test keeps its own.
#[derive(Clone)]
pub struct MockTransport {
    /// Every byte the engine has written, in order
    pub written: Arc<Mutex<Vec<u8>>>,
    reads: Arc<Mutex<VecDeque<Vec<u8>>>>,
    fail_read: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            reads: Arc::new(Mutex::new(VecDeque::new())),
            fail_read: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue one buffer to be returned by a future read
    pub fn push_read(&self, data: Vec<u8>) {
        self.reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(data);
    }

    /// Make the next read fail like a dead connection
    pub fn fail_next_read(&self) {
        self.fail_read.store(true, Ordering::Release);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn write_byte(&mut self, data: u8, _timeout: Duration) -> Result<usize> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data);
        Ok(1)
    }

    fn read_bulk(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if self.fail_read.swap(false, Ordering::AcqRel) {
            return Err(LinkError::TransferFailed("simulated bus failure".into()));
        }

        let mut reads = self.reads.lock().unwrap_or_else(PoisonError::into_inner);
        match reads.pop_front() {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }
}

/// Scripted USB host serving a fixed device list and `MockTransport`s
pub struct MockHost {
    devices: Mutex<Vec<DeviceDescriptor>>,
    transport: MockTransport,
    open_calls: AtomicUsize,
    fail_claim: AtomicBool,
}

impl MockHost {
    /// Host with no attached devices
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            transport: MockTransport::new(),
            open_calls: AtomicUsize::new(0),
            fail_claim: AtomicBool::new(false),
        }
    }

    /// Host with one attached device carrying the given identity
    pub fn with_device(vendor_id: u16, product_id: u16) -> Self {
        let host = Self::new();
        host.attach(descriptor(vendor_id, product_id));
        host
    }

    /// Add a device to the enumeration, last in order
    pub fn attach(&self, device: DeviceDescriptor) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device);
    }

    /// The shared transport behind every `open`
    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    /// Bytes written by the engine so far
    pub fn written(&self) -> Vec<u8> {
        self.transport
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `open` was called (i.e. how many engines were fed)
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::Acquire)
    }

    /// Make every subsequent `open` fail the interface claim
    pub fn fail_claim(&self) {
        self.fail_claim.store(true, Ordering::Release);
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbHost for MockHost {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn open(
        &self,
        _device: &DeviceDescriptor,
        config: &LinkConfig,
    ) -> Result<Box<dyn SerialTransport>> {
        self.open_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_claim.load(Ordering::Acquire) {
            return Err(LinkError::InterfaceClaimFailed {
                interface: config.device.interface,
            });
        }
        Ok(Box::new(self.transport.clone()))
    }
}

/// Broker that parks every request for the test to answer by hand
///
/// Models the platform prompt: `has_permission` is always false and the
/// responder sits in `pending` until the test calls `resolve` on it from
/// whatever thread it likes.
pub struct ManualBroker {
    pending: Mutex<Vec<PermissionResponder>>,
}

impl ManualBroker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Take the oldest parked request, if any
    pub fn take(&self) -> Option<PermissionResponder> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }
}

impl Default for ManualBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionBroker for ManualBroker {
    fn has_permission(&self, _device: &DeviceDescriptor) -> bool {
        false
    }

    fn request_permission(&self, responder: PermissionResponder) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(responder);
    }
}

/// Broker that refuses every request on the spot
pub struct DenyAll;

impl PermissionBroker for DenyAll {
    fn has_permission(&self, _device: &DeviceDescriptor) -> bool {
        false
    }

    fn request_permission(&self, responder: PermissionResponder) {
        responder.resolve(false);
    }
}
