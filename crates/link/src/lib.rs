//! USB-CDC single-byte link
//!
//! This crate connects a host application to one USB-attached
//! microcontroller presenting as a CDC (virtual serial) device and
//! exchanges single-byte command/echo messages with it. It owns the whole
//! connection lifecycle: enumeration, permission negotiation, interface
//! claim, line-coding setup, bulk endpoint resolution, and a dedicated
//! engine thread that serializes sends against receives and shuts down
//! cleanly.
//!
//! # Example
//!
//! ```no_run
//! use link::{LinkConfig, LinkController};
//!
//! # fn main() -> link::Result<()> {
//! let controller = LinkController::new(LinkConfig::default())?;
//! controller.connect()?;
//!
//! controller.send(0xff)?;
//! let echo = controller.receive()?;
//! if let Some(status) = echo.first() {
//!     println!("device says {:#04x}", status);
//! }
//!
//! controller.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod metrics;
pub mod testing;
pub mod types;
pub mod usb;

pub use config::{LinkConfig, Parity};
pub use controller::{ConnectOutcome, LinkController, Phase};
pub use error::{LinkError, Result};
pub use events::LinkEvent;
pub use metrics::TransferTimings;
pub use types::DeviceDescriptor;
