//! Codec errors

use crate::version::ProtocolVersion;
use thiserror::Error;

/// Failure to encode, frame or decode a message
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// The peer speaks a different major version
    #[error("Incompatible protocol version {found} (bridge speaks {expected})")]
    IncompatibleVersion {
        found: ProtocolVersion,
        expected: ProtocolVersion,
    },

    /// Length prefix above [`crate::MAX_FRAME_SIZE`]
    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    /// Buffer ends before the frame does
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the underlying stream reached end of file
    ///
    /// A caller closing its end between frames ends a session cleanly.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_version_names_both_sides() {
        let err = ProtocolError::IncompatibleVersion {
            found: ProtocolVersion::new(2, 1, 0),
            expected: ProtocolVersion::new(1, 0, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains("2.1.0"));
        assert!(msg.contains("1.0.0"));
    }

    #[test]
    fn test_eof_detection() {
        let eof = ProtocolError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(eof.is_eof());

        let reset = ProtocolError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(!reset.is_eof());

        let other = ProtocolError::FrameTooLarge { size: 10, max: 1 };
        assert!(!other.is_eof());
    }
}
