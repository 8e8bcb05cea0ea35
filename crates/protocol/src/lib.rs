//! Protocol library for usb-rgb-bridge
//!
//! This crate defines the message protocol spoken between a caller and the
//! bridge process. It provides type-safe message definitions, the color
//! payload framing for each firmware generation, serialization using
//! postcard, and protocol versioning.
//!
//! # Example
//!
//! ```
//! use protocol::{Message, MessagePayload, CURRENT_VERSION};
//! use protocol::{encode_framed, decode_framed};
//!
//! let msg = Message::new(MessagePayload::SetColorRequest {
//!     serial_number: "S1".to_string(),
//!     r: 255,
//!     g: 128,
//!     b: 0,
//! });
//!
//! let framed = encode_framed(&msg).unwrap();
//! let decoded = decode_framed(&framed).unwrap();
//! assert_eq!(decoded.version, CURRENT_VERSION);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{
    MAX_FRAME_SIZE, decode_framed, decode_message, encode_framed, encode_message, read_framed,
    validate_version, write_framed,
};

#[cfg(feature = "async")]
pub use codec::{read_framed_async, write_framed_async};
pub use error::{ProtocolError, Result};
pub use messages::{Message, MessagePayload};
pub use types::{
    BridgeError, ColorPayload, ConnectReport, ControlSetup, DeviceInfo, Direction,
    LEGACY_PAYLOAD_PREFIX, Recipient, RequestKind, Rgb, SET_RGB_REQUEST,
};
pub use version::{CURRENT_VERSION, ProtocolVersion};
