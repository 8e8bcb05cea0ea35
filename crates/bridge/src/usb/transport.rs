//! Transport capability
//!
//! The dispatcher and registry only talk to USB through these traits. The
//! libusb backend lives in [`crate::usb::rusb_transport`]; tests drive the
//! same code through a scripted mock.

use protocol::{ControlSetup, DeviceInfo};
use std::time::Duration;
use thiserror::Error;

/// Physical attachment point of a device
///
/// Identifies a device for detach matching: a departed device can no longer
/// be asked for its serial number, but its bus position is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLocation {
    pub bus: u8,
    pub address: u8,
}

impl std::fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bus={:03} addr={:03}", self.bus, self.address)
    }
}

/// Errors raised by a transport operation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Usb(#[from] rusb::Error),

    #[error("Device is not open")]
    NotOpen,
}

/// Device attach/detach notification
#[derive(Debug)]
pub enum PresenceEvent<D> {
    /// A new device was plugged in
    Arrived(D),
    /// The device at this location was unplugged
    Left(DeviceLocation),
}

/// One attached peripheral, as seen by the transport
pub trait TransportDevice {
    /// Serial number string (registry key)
    fn serial_number(&self) -> &str;

    /// Major part of bcdUSB
    fn usb_version_major(&self) -> u8;

    /// Bus position of the device
    fn location(&self) -> DeviceLocation;

    /// Active configuration value, `None` while unconfigured
    fn configuration(&self) -> Option<u8>;

    /// Whether the device has been opened
    fn is_open(&self) -> bool;

    fn open(&mut self) -> Result<(), TransportError>;

    fn select_configuration(&mut self, configuration: u8) -> Result<(), TransportError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    /// Release claimed interfaces and drop the open handle
    fn close(&mut self);

    /// Host-to-device control transfer; returns the number of bytes written
    fn control_transfer_out(
        &mut self,
        setup: &ControlSetup,
        payload: &[u8],
    ) -> Result<usize, TransportError>;

    /// Summary for device listings
    fn info(&self) -> DeviceInfo;
}

/// Enumeration and presence notifications
pub trait UsbTransport {
    type Device: TransportDevice;

    /// List every currently connected device that passes the transport's filters
    fn connected_devices(&mut self) -> Result<Vec<Self::Device>, TransportError>;

    /// Wait up to `timeout` for attach/detach notifications and return them
    /// in arrival order
    fn poll_presence(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<PresenceEvent<Self::Device>>, TransportError>;
}
