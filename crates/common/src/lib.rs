//! Common utilities for cdc-link
//!
//! This crate provides the plumbing shared by the link library and the CLI:
//! error handling, logging setup, and the bounded channel bridge between
//! caller threads and the USB engine thread.

pub mod channel;
pub mod error;
pub mod logging;

pub use channel::{EngineBridge, EngineCommand, EngineWorker, TransferStatus, create_engine_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
