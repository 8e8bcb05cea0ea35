//! Common utilities for usb-rgb-bridge
//!
//! This crate provides shared functionality for the bridge binary and its
//! tests: the async channel bridge between the Tokio runtime and the USB
//! worker thread, error handling, and logging setup.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
