//! Protocol version constants and handshake acceptance rules.
//!
//! Versions compare lexicographically on `(major, minor)`. A peer announcing
//! a version lower than our own is rejected with the incompatible-version
//! close opcode; a peer announcing a higher version is accepted and the
//! session runs at our (lower) version, so newer peers must stay
//! backwards-compatible on the wire.

use std::fmt;

use thiserror::Error;

/// A protocol version as carried in the hello exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

/// The version this build speaks. Bumped with every wire change.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 6 };

/// First version whose `CINN` carries the screensaver byte.
pub const VERSION_WITH_SCREENSAVER_BYTE: ProtocolVersion = ProtocolVersion { major: 1, minor: 7 };

/// First version with keep-alive support. Everything this build can
/// negotiate is at or above it, so keep-alives are always scheduled.
pub const VERSION_WITH_KEEP_ALIVE: ProtocolVersion = ProtocolVersion { major: 1, minor: 3 };

/// Raised when the peer's announced version cannot be accepted.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("incompatible protocol version {peer} (need at least {required})")]
pub struct IncompatibleVersion {
    pub peer: ProtocolVersion,
    pub required: ProtocolVersion,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Applies the acceptance rule to a peer's announced version and returns
    /// the version the session will run at.
    ///
    /// # Errors
    ///
    /// Returns [`IncompatibleVersion`] when `peer` is lexicographically lower
    /// than `self`.
    pub fn negotiate(self, peer: ProtocolVersion) -> Result<ProtocolVersion, IncompatibleVersion> {
        if peer < self {
            return Err(IncompatibleVersion { peer, required: self });
        }
        Ok(self.min(peer))
    }

    /// Whether `CINN` messages at this version carry the screensaver byte.
    pub fn has_screensaver_byte(self) -> bool {
        self >= VERSION_WITH_SCREENSAVER_BYTE
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
