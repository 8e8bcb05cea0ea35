//! USB subsystem
//!
//! Device discovery, the serial-number registry, and color commands. All of
//! it runs on a dedicated worker thread so blocking libusb calls never stall
//! the Tokio runtime.

pub mod dispatcher;
pub mod registry;
pub mod rusb_transport;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use worker::{WorkerSettings, spawn_usb_worker};
