//! Protocol message definitions
//!
//! This module defines every message exchanged between a caller and the
//! bridge. Messages are organized into logical groups:
//! - Device connection (connect all, connect one)
//! - Color control
//! - Discovery (list devices)
//! - Asynchronous device events (opened, disconnected)
//! - Connection management (ping/pong, errors)

use crate::types::{BridgeError, ConnectReport, DeviceInfo};
use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};

/// Top-level message envelope
///
/// All protocol messages are wrapped in this envelope which includes
/// the protocol version for compatibility checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version of this message
    pub version: ProtocolVersion,
    /// Message payload
    pub payload: MessagePayload,
}

impl Message {
    /// Wrap a payload in an envelope carrying the current protocol version
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            version: crate::CURRENT_VERSION,
            payload,
        }
    }
}

/// All message types in the protocol
///
/// Requests flow from the caller to the bridge and are answered with the
/// matching response, in order. Device events are pushed by the bridge at
/// any time between responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    // Device connection
    /// Enumerate every connected device, replace the registry and open each one
    ConnectAllRequest,

    /// Result of a connect-all; per-device failures are listed in the report
    ConnectAllResponse {
        result: Result<ConnectReport, BridgeError>,
    },

    /// Find a connected device by serial number, register and open it
    ConnectDeviceRequest { serial_number: String },

    /// Result of a connect-by-serial
    ConnectDeviceResponse { result: Result<(), BridgeError> },

    // Color control
    /// Set the LED color of a registered device
    ///
    /// Components are carried untyped and range-checked by the bridge.
    SetColorRequest {
        serial_number: String,
        r: i32,
        g: i32,
        b: i32,
    },

    /// Result of a set-color
    SetColorResponse { result: Result<(), BridgeError> },

    // Discovery
    /// Request a snapshot of the registered devices
    ListDevicesRequest,

    /// Snapshot of the registered devices
    ListDevicesResponse { devices: Vec<DeviceInfo> },

    // Device events
    /// A device completed the open sequence
    DeviceOpened { serial_number: String },

    /// A registered device was unplugged
    DeviceDisconnected { serial_number: String },

    // Connection management
    /// Keepalive ping
    Ping,

    /// Keepalive pong
    Pong,

    /// Request could not be decoded or is not understood
    Error { message: String },
}

impl MessagePayload {
    /// Whether the bridge pushes this payload unprompted
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            Self::DeviceOpened { .. } | Self::DeviceDisconnected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CURRENT_VERSION;

    #[test]
    fn test_new_uses_current_version() {
        let msg = Message::new(MessagePayload::Ping);
        assert_eq!(msg.version, CURRENT_VERSION);
        assert_eq!(msg.payload, MessagePayload::Ping);
    }

    #[test]
    fn test_event_classification() {
        assert!(
            MessagePayload::DeviceOpened {
                serial_number: "S1".into()
            }
            .is_event()
        );
        assert!(
            MessagePayload::DeviceDisconnected {
                serial_number: "S1".into()
            }
            .is_event()
        );
        assert!(!MessagePayload::ConnectAllRequest.is_event());
        assert!(!MessagePayload::Pong.is_event());
    }
}
