//! Protocol versioning
//!
//! Every envelope carries the sender's version. Only the major number has to
//! agree; minor and patch changes are additive on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Version spoken by this build
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether messages stamped with `peer` can be decoded by this version
    pub fn accepts(&self, peer: &ProtocolVersion) -> bool {
        self.major == peer.major
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_major_is_accepted() {
        let base = ProtocolVersion::new(1, 0, 0);
        assert!(base.accepts(&ProtocolVersion::new(1, 4, 2)));
        assert!(ProtocolVersion::new(1, 4, 2).accepts(&base));
    }

    #[test]
    fn test_other_major_is_rejected() {
        let base = ProtocolVersion::new(1, 0, 0);
        assert!(!base.accepts(&ProtocolVersion::new(2, 0, 0)));
        assert!(!base.accepts(&ProtocolVersion::new(0, 9, 0)));
    }

    #[test]
    fn test_display() {
        assert_eq!(CURRENT_VERSION.to_string(), "1.0.0");
        assert_eq!(ProtocolVersion::new(3, 12, 7).to_string(), "3.12.7");
    }
}
