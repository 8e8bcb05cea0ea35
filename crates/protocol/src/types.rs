//! Device, color and error type definitions
//!
//! This module defines the types shared by the bridge and its callers:
//! device summaries, RGB colors and their firmware-specific payload framing,
//! the control transfer descriptor used to deliver them, and the error kinds
//! a command can fail with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device information returned by a device listing
///
/// A snapshot of one registered device. The serial number is the key callers
/// use to address the device in every other command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial number string (registry key)
    pub serial_number: String,
    /// Major part of the device's bcdUSB, selects the color payload framing
    pub usb_version_major: u8,
    /// Whether the open sequence has completed on this device
    pub is_open: bool,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Bus number on the host
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
    /// Product string (if available)
    pub product: Option<String>,
}

/// An RGB color with one byte per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build a color from untyped components
    ///
    /// Every component must lie in `0..=255`; anything else is rejected with
    /// [`BridgeError::InvalidArgument`] instead of being truncated.
    ///
    /// # Example
    /// ```
    /// use protocol::Rgb;
    ///
    /// assert_eq!(Rgb::from_components(10, 20, 30).unwrap(), Rgb::new(10, 20, 30));
    /// assert!(Rgb::from_components(256, 0, 0).is_err());
    /// assert!(Rgb::from_components(0, -1, 0).is_err());
    /// ```
    pub fn from_components(r: i32, g: i32, b: i32) -> Result<Self, BridgeError> {
        let channel = |name: &str, value: i32| {
            u8::try_from(value).map_err(|_| BridgeError::InvalidArgument {
                message: format!("{} component {} is outside 0..=255", name, value),
            })
        };

        Ok(Self {
            r: channel("red", r)?,
            g: channel("green", g)?,
            b: channel("blue", b)?,
        })
    }
}

/// First byte of the payload expected by major-version-1 firmware
pub const LEGACY_PAYLOAD_PREFIX: u8 = 0xFF;

/// Color payload framed for a specific firmware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorPayload {
    /// Major version 2: `[r, g, b]`
    Compact([u8; 3]),
    /// Major version 1: `[0xFF, r, g, b]`
    Legacy([u8; 4]),
}

impl ColorPayload {
    /// Frame `color` for a device reporting `usb_version_major`
    ///
    /// # Example
    /// ```
    /// use protocol::{ColorPayload, Rgb};
    ///
    /// let payload = ColorPayload::for_firmware(1, Rgb::new(10, 20, 30)).unwrap();
    /// assert_eq!(payload.as_bytes(), &[0xFF, 10, 20, 30]);
    /// ```
    pub fn for_firmware(usb_version_major: u8, color: Rgb) -> Result<Self, BridgeError> {
        match usb_version_major {
            2 => Ok(Self::Compact([color.r, color.g, color.b])),
            1 => Ok(Self::Legacy([
                LEGACY_PAYLOAD_PREFIX,
                color.r,
                color.g,
                color.b,
            ])),
            version => Err(BridgeError::UnsupportedFirmwareVersion { version }),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Compact(bytes) => bytes,
            Self::Legacy(bytes) => bytes,
        }
    }
}

/// Data phase direction of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Request type field of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
}

/// Recipient field of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Setup stage of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSetup {
    pub direction: Direction,
    pub kind: RequestKind,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlSetup {
    /// Encode direction, kind and recipient as the `bmRequestType` byte
    pub const fn request_type(&self) -> u8 {
        let direction = match self.direction {
            Direction::Out => 0x00,
            Direction::In => 0x80,
        };
        let kind = match self.kind {
            RequestKind::Standard => 0x00,
            RequestKind::Class => 0x20,
            RequestKind::Vendor => 0x40,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
            Recipient::Other => 0x03,
        };
        direction | kind | recipient
    }
}

/// Vendor request that sets the LED color
pub const SET_RGB_REQUEST: ControlSetup = ControlSetup {
    direction: Direction::Out,
    kind: RequestKind::Vendor,
    recipient: Recipient::Device,
    request: 1,
    value: 0,
    index: 0,
};

/// Outcome of a connect-all command
///
/// Per-device failures are collected here rather than aborting the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectReport {
    /// Serial numbers that completed the open sequence
    pub opened: Vec<String>,
    /// Devices that failed to open
    pub failed: Vec<BridgeError>,
}

/// Errors a bridge command can fail with
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BridgeError {
    /// No registered (or connected) device has this serial number
    #[error("Device not found: {serial_number}")]
    NotFound { serial_number: String },

    /// A step of the open/configure/claim sequence failed
    #[error("Failed to open device {serial_number}: {message}")]
    OpenFailed {
        serial_number: String,
        message: String,
    },

    /// The device reports a firmware generation with no known payload framing
    #[error("Unknown device firmware version {version}")]
    UnsupportedFirmwareVersion { version: u8 },

    /// The transport rejected the control transfer
    #[error("Control transfer to {serial_number} failed: {message}")]
    TransferFailed {
        serial_number: String,
        message: String,
    },

    /// A command argument was out of range
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Listing the connected devices failed
    #[error("Device enumeration failed: {message}")]
    EnumerationFailed { message: String },

    /// The USB worker could not be reached
    #[error("USB worker unavailable: {message}")]
    Unavailable { message: String },
}
