//! Channel bridge between caller threads and the USB engine thread
//!
//! Requests travel over a bounded queue of capacity 1, so at most one
//! transfer request can be outstanding at any moment. Each request carries
//! a oneshot completion that the engine resolves when the transfer is done;
//! closing the queue is the engine's stop signal.

use async_channel::{Receiver, Sender, bounded};
use tokio::sync::oneshot;

/// A single transfer request for the engine thread
#[derive(Debug)]
pub enum EngineCommand {
    /// Write one byte to the bulk OUT endpoint
    Send {
        /// The byte to transmit
        data: u8,
        /// Resolved when the write completes
        completion: oneshot::Sender<TransferStatus>,
    },

    /// Read from the bulk IN endpoint into a fixed-size buffer
    Receive {
        /// Resolved with the received bytes (empty means "no data")
        completion: oneshot::Sender<TransferStatus>,
    },
}

/// Outcome of a single transfer, published through the request's completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// OUT transfer finished; `len` bytes were written
    Sent { len: usize },
    /// IN transfer finished; empty data means the device had nothing to say
    Received { data: Vec<u8> },
    /// The transfer failed on the bus
    Failed { reason: String },
}

/// Caller-side handle to the engine queue
#[derive(Clone)]
pub struct EngineBridge {
    cmd_tx: Sender<EngineCommand>,
}

impl EngineBridge {
    /// Submit a request, waiting for the single queue slot if it is taken.
    ///
    /// Fails once the queue has been closed by `close()`, which callers
    /// treat as "a stop is in progress".
    pub fn submit_blocking(&self, cmd: EngineCommand) -> crate::Result<()> {
        self.cmd_tx
            .send_blocking(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Close the queue, waking the engine out of its blocking wait
    pub fn close(&self) {
        self.cmd_tx.close();
    }
}

/// Engine-side handle to the queue
pub struct EngineWorker {
    cmd_rx: Receiver<EngineCommand>,
}

impl EngineWorker {
    /// Block until the next request arrives.
    ///
    /// Returns an error once the caller side has closed the queue.
    pub fn recv_blocking(&self) -> crate::Result<EngineCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the capacity-1 bridge between callers and the engine thread
pub fn create_engine_bridge() -> (EngineBridge, EngineWorker) {
    let (cmd_tx, cmd_rx) = bounded(1);

    (EngineBridge { cmd_tx }, EngineWorker { cmd_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_round_trip() {
        let (bridge, worker) = create_engine_bridge();

        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_blocking().unwrap();
            match cmd {
                EngineCommand::Send { data, completion } => {
                    completion.send(TransferStatus::Sent { len: 1 }).unwrap();
                    data
                }
                EngineCommand::Receive { .. } => panic!("expected a send request"),
            }
        });

        let (tx, rx) = oneshot::channel();
        bridge
            .submit_blocking(EngineCommand::Send {
                data: 0x42,
                completion: tx,
            })
            .unwrap();

        assert_eq!(handle.join().unwrap(), 0x42);
        assert_eq!(rx.blocking_recv().unwrap(), TransferStatus::Sent { len: 1 });
    }

    #[test]
    fn test_close_unblocks_worker() {
        let (bridge, worker) = create_engine_bridge();

        let handle = std::thread::spawn(move || worker.recv_blocking().is_err());

        bridge.close();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_submit_after_close_fails() {
        let (bridge, _worker) = create_engine_bridge();
        bridge.close();

        let (tx, _rx) = oneshot::channel();
        let result = bridge.submit_blocking(EngineCommand::Receive { completion: tx });
        assert!(result.is_err());
    }

    #[test]
    fn test_queue_holds_at_most_one_request() {
        let (bridge, worker) = create_engine_bridge();

        let (tx, _rx) = oneshot::channel();
        bridge
            .submit_blocking(EngineCommand::Send {
                data: 0x01,
                completion: tx,
            })
            .unwrap();

        // The slot is taken until the worker drains it; a second submit
        // must block, so it has to run on its own thread here.
        let bridge2 = bridge.clone();
        let second = std::thread::spawn(move || {
            let (tx, _rx) = oneshot::channel();
            bridge2.submit_blocking(EngineCommand::Send {
                data: 0x02,
                completion: tx,
            })
        });

        let first = worker.recv_blocking().unwrap();
        assert!(matches!(first, EngineCommand::Send { data: 0x01, .. }));

        second.join().unwrap().unwrap();
        let queued = worker.recv_blocking().unwrap();
        assert!(matches!(queued, EngineCommand::Send { data: 0x02, .. }));
    }
}
