//! # edgehop-core
//!
//! Shared library for Edgehop containing the wire protocol (framing,
//! format-string codec, typed messages, versioning), screen topology and
//! configuration, clipboard marshalling and chunking, key/modifier
//! translation, and the certificate fingerprint trust store.
//!
//! This crate is used by both the server and client applications. It has no
//! dependency on OS input APIs or UI frameworks.

pub mod clipboard;
pub mod config;
pub mod environment;
pub mod fingerprint;
pub mod keys;
pub mod protocol;
pub mod tls;
pub mod topology;

/// Re-export commonly used types at the crate root for convenience.
pub use clipboard::{ChunkMark, ClipboardData, ClipboardId};
pub use config::{ConfigError, ServerConfig};
pub use environment::Environment;
pub use fingerprint::{Fingerprint, FingerprintDatabase};
pub use keys::{KeyModifierMask, ModifierId, ModifierMap};
pub use protocol::{
    FrameError, Message, PacketStream, ProtocolError, ProtocolVersion, ScreenInfo,
    PROTOCOL_VERSION,
};
pub use topology::{Direction, ScreenShape, Topology};
