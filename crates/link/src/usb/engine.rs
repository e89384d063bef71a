//! USB transfer engine
//!
//! Dedicated thread for executing bulk transfers. The engine blocks on the
//! capacity-1 request queue, performs exactly one directional transfer per
//! wake-up, and resolves the request's completion. It terminates when the
//! stop flag is raised or the queue is closed, emitting `UsbStopped` once
//! on the way out.

use crate::error::{LinkError, Result};
use crate::events::LinkEvent;
use crate::metrics::TransferTimings;
use crate::usb::transport::SerialTransport;
use common::{EngineCommand, EngineWorker, TransferStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transfer engine state, moved onto its worker thread by `spawn_engine`
pub(crate) struct TransferEngine {
    transport: Box<dyn SerialTransport>,
    worker: EngineWorker,
    stop: Arc<AtomicBool>,
    event_tx: async_channel::Sender<LinkEvent>,
    timings: Arc<Mutex<TransferTimings>>,
    read_buffer_len: usize,
    io_timeout: Duration,
}

impl TransferEngine {
    pub(crate) fn new(
        transport: Box<dyn SerialTransport>,
        worker: EngineWorker,
        stop: Arc<AtomicBool>,
        event_tx: async_channel::Sender<LinkEvent>,
        timings: Arc<Mutex<TransferTimings>>,
        read_buffer_len: usize,
        io_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            worker,
            stop,
            event_tx,
            timings,
            read_buffer_len,
            io_timeout,
        }
    }

    /// Run the engine loop until stopped.
    ///
    /// Each iteration handles at most one request. The queue being closed
    /// doubles as the stop signal, so `stop()` can unblock a waiting
    /// engine without a sentinel message.
    pub(crate) fn run(mut self) {
        info!("transfer engine started");

        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            let cmd = match self.worker.recv_blocking() {
                Ok(cmd) => cmd,
                Err(_) => break,
            };

            // A stop may have been requested while we were waiting
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            match cmd {
                EngineCommand::Send { data, completion } => self.handle_send(data, completion),
                EngineCommand::Receive { completion } => self.handle_receive(completion),
            }
        }

        let _ = self.event_tx.try_send(LinkEvent::UsbStopped);
        info!("transfer engine stopped");
    }

    /// Run one blocking transfer, re-waiting on interrupted system calls.
    ///
    /// An interrupt that is not stop-initiated is not fatal; the transfer
    /// is simply issued again. Once the stop flag is up, the interrupt is
    /// surfaced so the loop can terminate.
    fn retry_interrupted<T>(&mut self, mut transfer: impl FnMut(&mut dyn SerialTransport) -> Result<T>) -> Result<T> {
        loop {
            match transfer(self.transport.as_mut()) {
                Err(LinkError::Usb(rusb::Error::Interrupted))
                    if !self.stop.load(Ordering::Acquire) =>
                {
                    debug!("transfer interrupted, re-waiting");
                }
                other => return other,
            }
        }
    }

    fn handle_send(&mut self, data: u8, completion: tokio::sync::oneshot::Sender<TransferStatus>) {
        let timeout = self.io_timeout;
        match self.retry_interrupted(|transport| transport.write_byte(data, timeout)) {
            Ok(len) => {
                self.timings
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record_send();
                debug!("sent {:#04x} ({} byte(s) accepted)", data, len);
                let _ = completion.send(TransferStatus::Sent { len });
            }
            Err(e) => {
                // A failed send is reported but does not kill the engine
                warn!("bulk OUT transfer failed: {}", e);
                let _ = completion.send(TransferStatus::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn handle_receive(&mut self, completion: tokio::sync::oneshot::Sender<TransferStatus>) {
        let mut buf = vec![0u8; self.read_buffer_len];
        let timeout = self.io_timeout;
        match self.retry_interrupted(|transport| transport.read_bulk(&mut buf, timeout)) {
            Ok(len) => {
                buf.truncate(len);
                if len > 0 {
                    self.timings
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record_receive();
                }
                debug!("received {} byte(s)", len);
                let _ = completion.send(TransferStatus::Received { data: buf });
            }
            Err(e) => {
                // A dead connection would otherwise loop forever; raise the
                // stop flag so the engine terminates instead of retrying.
                warn!("bulk IN transfer failed, stopping engine: {}", e);
                self.stop.store(true, Ordering::Release);
                let _ = completion.send(TransferStatus::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Spawn the engine on its own named OS thread
pub(crate) fn spawn_engine(engine: TransferEngine) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("usb-engine".to_string())
        .spawn(move || engine.run())
        .expect("Failed to spawn USB engine thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use common::create_engine_bridge;
    use tokio::sync::oneshot;

    fn engine_fixture(
        transport: MockTransport,
    ) -> (
        common::EngineBridge,
        Arc<AtomicBool>,
        async_channel::Receiver<LinkEvent>,
        std::thread::JoinHandle<()>,
    ) {
        let (bridge, worker) = create_engine_bridge();
        let stop = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = async_channel::bounded(16);
        let timings = Arc::new(Mutex::new(TransferTimings::default()));

        let engine = TransferEngine::new(
            Box::new(transport),
            worker,
            stop.clone(),
            event_tx,
            timings,
            64,
            Duration::from_millis(100),
        );
        let handle = spawn_engine(engine);

        (bridge, stop, event_rx, handle)
    }

    #[test]
    fn test_send_resolves_completion() {
        let transport = MockTransport::new();
        let written = transport.written.clone();
        let (bridge, stop, event_rx, handle) = engine_fixture(transport);

        let (tx, rx) = oneshot::channel();
        bridge
            .submit_blocking(EngineCommand::Send {
                data: 0xa5,
                completion: tx,
            })
            .unwrap();
        assert_eq!(rx.blocking_recv().unwrap(), TransferStatus::Sent { len: 1 });
        assert_eq!(*written.lock().unwrap(), vec![0xa5]);

        stop.store(true, Ordering::Release);
        bridge.close();
        handle.join().unwrap();
        assert_eq!(event_rx.try_recv().unwrap(), LinkEvent::UsbStopped);
    }

    #[test]
    fn test_receive_returns_scripted_data() {
        let transport = MockTransport::new();
        transport.push_read(vec![0xff]);
        let (bridge, stop, _event_rx, handle) = engine_fixture(transport);

        let (tx, rx) = oneshot::channel();
        bridge
            .submit_blocking(EngineCommand::Receive { completion: tx })
            .unwrap();
        assert_eq!(
            rx.blocking_recv().unwrap(),
            TransferStatus::Received { data: vec![0xff] }
        );

        stop.store(true, Ordering::Release);
        bridge.close();
        handle.join().unwrap();
    }

    #[test]
    fn test_receive_failure_stops_engine() {
        let transport = MockTransport::new();
        transport.fail_next_read();
        let (bridge, stop, event_rx, handle) = engine_fixture(transport);

        let (tx, rx) = oneshot::channel();
        bridge
            .submit_blocking(EngineCommand::Receive { completion: tx })
            .unwrap();
        assert!(matches!(
            rx.blocking_recv().unwrap(),
            TransferStatus::Failed { .. }
        ));

        // The engine raised its own stop flag and exits without any help
        handle.join().unwrap();
        assert!(stop.load(Ordering::Acquire));
        assert_eq!(event_rx.try_recv().unwrap(), LinkEvent::UsbStopped);
    }

    #[test]
    fn test_closed_queue_stops_engine() {
        let transport = MockTransport::new();
        let (bridge, _stop, event_rx, handle) = engine_fixture(transport);

        bridge.close();
        handle.join().unwrap();
        assert_eq!(event_rx.try_recv().unwrap(), LinkEvent::UsbStopped);
        assert!(event_rx.try_recv().is_err());
    }
}
