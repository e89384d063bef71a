//! Connection lifecycle controller
//!
//! `LinkController` owns the whole connection cycle: enumeration,
//! permission negotiation, interface claim, engine spawn, request
//! submission, and shutdown. One controller manages at most one engine at
//! a time; `stop()` resets it to `Idle` so the next `connect()` starts
//! fresh. All entry points serialize on one internal mutex, so the
//! controller can be shared across threads, including whatever thread the
//! platform delivers permission results on.

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::events::LinkEvent;
use crate::metrics::TransferTimings;
use crate::types::DeviceDescriptor;
use crate::usb::engine::{TransferEngine, spawn_engine};
use crate::usb::host::{LibusbHost, UsbHost};
use crate::usb::permission::{AlwaysGranted, PermissionBroker, PermissionResponder};
use common::{EngineBridge, EngineCommand, TransferStatus, create_engine_bridge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No connection; `connect` may be called
    Idle,
    /// Scanning the bus for the target device
    Enumerating,
    /// A permission prompt is outstanding
    AwaitingPermission,
    /// Engine running; `send`/`receive` are valid
    Connected,
    /// `stop` is tearing the connection down
    Stopping,
}

/// What a `connect` call achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The engine is running and the link is usable
    Connected,
    /// A permission prompt was issued; the connection resumes on the
    /// thread that answers it
    PermissionPending,
}

/// Mutable controller state, all behind one lock
struct Inner {
    phase: Phase,
    error_flag: bool,
    /// Bumped whenever an outstanding permission continuation must be
    /// invalidated (new attempt, stop)
    generation: u64,
    bridge: Option<EngineBridge>,
    engine_thread: Option<std::thread::JoinHandle<()>>,
    stop_flag: Option<Arc<AtomicBool>>,
}

/// Public-facing handle for one USB serial link
pub struct LinkController {
    host: Arc<dyn UsbHost>,
    broker: Arc<dyn PermissionBroker>,
    config: LinkConfig,
    inner: Arc<Mutex<Inner>>,
    timings: Arc<Mutex<TransferTimings>>,
    event_tx: async_channel::Sender<LinkEvent>,
    event_rx: async_channel::Receiver<LinkEvent>,
}

impl LinkController {
    /// Create a controller over the real libusb host with no permission
    /// prompt (access control happens at open time)
    pub fn new(config: LinkConfig) -> Result<Self> {
        let host = Arc::new(LibusbHost::new()?);
        Self::with_host(config, host, Arc::new(AlwaysGranted))
    }

    /// Create a controller over explicit host and permission
    /// implementations
    pub fn with_host(
        config: LinkConfig,
        host: Arc<dyn UsbHost>,
        broker: Arc<dyn PermissionBroker>,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, event_rx) = async_channel::bounded(16);

        Ok(Self {
            host,
            broker,
            config,
            inner: Arc::new(Mutex::new(Inner {
                phase: Phase::Idle,
                error_flag: false,
                generation: 0,
                bridge: None,
                engine_thread: None,
                stop_flag: None,
            })),
            timings: Arc::new(Mutex::new(TransferTimings::default())),
            event_tx,
            event_rx,
        })
    }

    /// Subscription handle for the controller's notifications
    pub fn events(&self) -> async_channel::Receiver<LinkEvent> {
        self.event_rx.clone()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.lock_inner().phase
    }

    /// Whether the last connection attempt ended in an error
    pub fn has_error(&self) -> bool {
        self.lock_inner().error_flag
    }

    /// The configuration this controller was built with
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Snapshot of the latest transfer timestamps
    pub fn timings(&self) -> TransferTimings {
        *self
            .timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget recorded transfer timestamps
    pub fn clear_timings(&self) {
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Find the target device, negotiate access, and start the engine.
    ///
    /// Valid only from `Idle`; any other phase reports `AlreadyRunning`
    /// and leaves the existing connection untouched. Returns
    /// `PermissionPending` when a prompt had to be issued, in which case
    /// the connection completes (or aborts) on the thread that delivers
    /// the answer.
    pub fn connect(&self) -> Result<ConnectOutcome> {
        let mut inner = self.lock_inner();

        if inner.phase != Phase::Idle || inner.engine_thread.is_some() {
            warn!("connect() while {:?}", inner.phase);
            self.emit(LinkEvent::AlreadyRunning);
            return Err(LinkError::AlreadyRunning);
        }
        inner.phase = Phase::Enumerating;

        let vendor_id = self.config.device.vendor_id;
        let product_id = self.config.device.product_id;

        let devices = match self.host.list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                inner.phase = Phase::Idle;
                inner.error_flag = true;
                return Err(e);
            }
        };

        // First enumerated match wins; further matches are ignored
        let Some(device) = devices.into_iter().find(|d| d.matches(vendor_id, product_id)) else {
            inner.error_flag = true;
            inner.phase = Phase::Idle;
            self.emit(LinkEvent::DeviceNotFound {
                vendor_id,
                product_id,
            });
            return Err(LinkError::DeviceNotFound {
                vendor_id,
                product_id,
            });
        };
        info!("found target device {}", device);

        if self.broker.has_permission(&device) {
            if let Err(e) = self.spawn_connected(&mut inner, &device) {
                inner.error_flag = true;
                inner.phase = Phase::Idle;
                return Err(e);
            }
            return Ok(ConnectOutcome::Connected);
        }

        inner.generation += 1;
        inner.phase = Phase::AwaitingPermission;
        let responder = self.permission_continuation(&device, inner.generation);

        // Release the lock first: a broker may answer on this very thread
        drop(inner);
        debug!("requesting permission for {}", device);
        self.broker.request_permission(responder);

        Ok(ConnectOutcome::PermissionPending)
    }

    /// Queue one byte for the bulk OUT endpoint.
    ///
    /// Fire-and-forget: returns as soon as the request is queued, without
    /// awaiting the transfer. Silently ignored while a stop is in
    /// progress.
    pub fn send(&self, data: u8) -> Result<()> {
        let Some(bridge) = self.bridge_for_request()? else {
            return Ok(());
        };

        let (completion, _discarded) = oneshot::channel();
        if bridge
            .submit_blocking(EngineCommand::Send { data, completion })
            .is_err()
        {
            // The queue closed under us: a stop raced in, making this a no-op
            debug!("send({:#04x}) dropped, engine is stopping", data);
        }
        Ok(())
    }

    /// Request one bulk IN transfer and block until it completes.
    ///
    /// Returns the received bytes; an empty buffer means the device had
    /// no data (or a stop raced the request).
    pub fn receive(&self) -> Result<Vec<u8>> {
        let Some(bridge) = self.bridge_for_request()? else {
            return Ok(Vec::new());
        };

        let (completion, outcome) = oneshot::channel();
        if bridge
            .submit_blocking(EngineCommand::Receive { completion })
            .is_err()
        {
            return Ok(Vec::new());
        }

        match outcome.blocking_recv() {
            Ok(TransferStatus::Received { data }) => Ok(data),
            Ok(TransferStatus::Failed { reason }) => Err(LinkError::TransferFailed(reason)),
            Ok(TransferStatus::Sent { .. }) => {
                Err(LinkError::Channel("send status answered a receive request".into()))
            }
            // The engine discarded the request while shutting down
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Tear down the connection and return to `Idle`.
    ///
    /// Idempotent: a second call on an already-idle controller does
    /// nothing. Raises the engine stop flag, closes the request queue to
    /// unblock the worker, joins its thread (every transfer timeout is
    /// bounded, so the join terminates), and invalidates any outstanding
    /// permission continuation.
    pub fn stop(&self) -> Result<()> {
        let engine_thread = {
            let mut inner = self.lock_inner();
            inner.generation += 1;

            if inner.engine_thread.is_none() {
                // Nothing to join: either already idle, an attempt was
                // still awaiting permission, or another stop is mid-flight
                if inner.phase != Phase::Stopping {
                    inner.phase = Phase::Idle;
                }
                return Ok(());
            }

            inner.phase = Phase::Stopping;
            if let Some(stop) = inner.stop_flag.take() {
                stop.store(true, Ordering::Release);
            }
            if let Some(bridge) = inner.bridge.take() {
                bridge.close();
            }
            inner.engine_thread.take()
        };

        if let Some(thread) = engine_thread {
            debug!("joining engine thread");
            if thread.join().is_err() {
                error!("engine thread panicked");
            }
        }

        let mut inner = self.lock_inner();
        inner.phase = Phase::Idle;
        inner.error_flag = false;
        info!("link stopped");
        Ok(())
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LinkEvent) {
        if self.event_tx.try_send(event.clone()).is_err() {
            warn!("event channel full, dropping {:?}", event);
        }
    }

    /// Fetch the engine bridge if requests are currently allowed.
    ///
    /// `Ok(None)` means "swallow the request quietly" (stop in progress);
    /// an error means the controller is not connected at all.
    fn bridge_for_request(&self) -> Result<Option<EngineBridge>> {
        let inner = self.lock_inner();
        match inner.phase {
            Phase::Stopping => Ok(None),
            Phase::Connected => inner
                .bridge
                .clone()
                .map(Some)
                .ok_or_else(|| LinkError::Channel("engine queue missing".into())),
            _ => Err(LinkError::NotConnected),
        }
    }

    /// Open the device and start the engine; `inner` must be locked
    fn spawn_connected(&self, inner: &mut Inner, device: &DeviceDescriptor) -> Result<()> {
        start_engine(
            inner,
            self.host.as_ref(),
            &self.config,
            &self.event_tx,
            &self.timings,
            device,
        )
    }

    /// Build the one-shot continuation that resumes (or aborts) the
    /// connection when the permission answer arrives
    fn permission_continuation(
        &self,
        device: &DeviceDescriptor,
        generation: u64,
    ) -> PermissionResponder {
        let inner = self.inner.clone();
        let host = self.host.clone();
        let config = self.config.clone();
        let event_tx = self.event_tx.clone();
        let timings = self.timings.clone();
        let vendor_id = self.config.device.vendor_id;
        let product_id = self.config.device.product_id;

        PermissionResponder::new(
            device.clone(),
            Box::new(move |result| {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);

                // A newer attempt or a stop supersedes this continuation
                if inner.generation != generation || inner.phase != Phase::AwaitingPermission {
                    debug!("ignoring stale permission result for {}", result.device);
                    return;
                }

                if !result.granted {
                    warn!("permission denied for {}", result.device);
                    inner.error_flag = true;
                    inner.phase = Phase::Idle;
                    let _ = event_tx.try_send(LinkEvent::PermissionDenied {
                        device: result.device,
                    });
                    return;
                }

                if !result.device.matches(vendor_id, product_id) {
                    // The grant is for some other device; the target is gone
                    debug!("granted device {} is not the target, aborting", result.device);
                    inner.phase = Phase::Idle;
                    return;
                }

                if let Err(e) = start_engine(
                    &mut inner,
                    host.as_ref(),
                    &config,
                    &event_tx,
                    &timings,
                    &result.device,
                ) {
                    error!("connection setup failed after permission grant: {}", e);
                    inner.error_flag = true;
                    inner.phase = Phase::Idle;
                }
            }),
        )
    }
}

/// Open `device` and hand a fresh engine its transport; `inner` must be
/// locked by the caller
fn start_engine(
    inner: &mut Inner,
    host: &dyn UsbHost,
    config: &LinkConfig,
    event_tx: &async_channel::Sender<LinkEvent>,
    timings: &Arc<Mutex<TransferTimings>>,
    device: &DeviceDescriptor,
) -> Result<()> {
    let transport = host.open(device, config)?;

    let (bridge, worker) = create_engine_bridge();
    let stop = Arc::new(AtomicBool::new(false));
    let engine = TransferEngine::new(
        transport,
        worker,
        stop.clone(),
        event_tx.clone(),
        timings.clone(),
        config.transfer.read_buffer_len,
        config.io_timeout(),
    );

    inner.engine_thread = Some(spawn_engine(engine));
    inner.bridge = Some(bridge);
    inner.stop_flag = Some(stop);
    inner.phase = Phase::Connected;
    inner.error_flag = false;
    info!("connected to {}", device);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHost;

    #[test]
    fn test_new_controller_is_idle() {
        let host = Arc::new(MockHost::new());
        let controller =
            LinkController::with_host(LinkConfig::default(), host, Arc::new(AlwaysGranted))
                .unwrap();

        assert_eq!(controller.phase(), Phase::Idle);
        assert!(!controller.has_error());
    }

    #[test]
    fn test_with_host_rejects_invalid_config() {
        let mut config = LinkConfig::default();
        config.transfer.io_timeout_ms = 0;

        let host = Arc::new(MockHost::new());
        let result = LinkController::with_host(config, host, Arc::new(AlwaysGranted));
        assert!(matches!(result, Err(LinkError::Config(_))));
    }

    #[test]
    fn test_send_requires_connection() {
        let host = Arc::new(MockHost::new());
        let controller =
            LinkController::with_host(LinkConfig::default(), host, Arc::new(AlwaysGranted))
                .unwrap();

        assert!(matches!(
            controller.send(0x01),
            Err(LinkError::NotConnected)
        ));
        assert!(matches!(
            controller.receive(),
            Err(LinkError::NotConnected)
        ));
    }
}
