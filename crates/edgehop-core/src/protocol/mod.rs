//! Wire protocol: framing, format-string codec, typed messages, versioning,
//! keep-alive schedule, and sequence counters.

pub mod codec;
pub mod frame;
pub mod keepalive;
pub mod messages;
pub mod options;
pub mod sequence;
pub mod version;

pub use codec::{read_frame, write_frame, Item, ProtocolError, MAX_MESSAGE_LENGTH};
pub use frame::{encode_frame, FrameBuffer, FrameError, PacketStream};
pub use keepalive::{KeepAliveSchedule, KEEP_ALIVES_UNTIL_DEATH, KEEP_ALIVE_RATE};
pub use messages::{Message, ScreenInfo};
pub use sequence::{is_stale, SequenceCounter};
pub use version::{IncompatibleVersion, ProtocolVersion, PROTOCOL_VERSION};
