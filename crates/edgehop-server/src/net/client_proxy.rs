//! Per-client connection state held by the engine.
//!
//! A proxy is the engine's handle on one connected secondary screen: its
//! negotiated version, last reported shape, outbound message queue,
//! keep-alive schedule, and per-slot clipboard state. The socket itself is
//! driven by the listener's read/write tasks; the engine only ever touches
//! the proxy.

use std::time::Instant;

use edgehop_core::clipboard::{ChunkAssembler, SlotState, CLIPBOARD_COUNT};
use edgehop_core::protocol::{KeepAliveSchedule, Message, ProtocolVersion, ScreenInfo};
use edgehop_core::topology::ScreenShape;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Stable key for one connection in every engine table.
pub type ConnectionId = Uuid;

/// The engine's view of one connected client.
#[derive(Debug)]
pub struct ClientProxy {
    pub id: ConnectionId,
    /// Canonical screen name.
    pub name: String,
    /// Version negotiated during the hello exchange.
    pub version: ProtocolVersion,
    /// Last shape the client reported via `DINF`.
    pub info: ScreenInfo,
    /// Set once the info exchange completed (`CIAK` sent).
    pub ready: bool,
    pub keepalive: KeepAliveSchedule,
    /// Ownership / sent / sequence per clipboard slot.
    pub clipboard: [SlotState; CLIPBOARD_COUNT],
    /// Reassembly state for inbound `DCLP` chunks, per slot.
    pub assemblers: [ChunkAssembler; CLIPBOARD_COUNT],
    outbound: mpsc::UnboundedSender<Message>,
}

impl ClientProxy {
    pub fn new(
        name: String,
        version: ProtocolVersion,
        outbound: mpsc::UnboundedSender<Message>,
        now: Instant,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            version,
            info: ScreenInfo {
                x: 0,
                y: 0,
                width: 0,
                height: 0,
                cursor_x: 0,
                cursor_y: 0,
            },
            ready: false,
            keepalive: KeepAliveSchedule::with_defaults(now),
            clipboard: Default::default(),
            assemblers: Default::default(),
            outbound,
        }
    }

    /// Queues a message on the connection's write buffer. Returns false when
    /// the write task is gone (the connection is closing).
    pub fn send(&self, message: Message) -> bool {
        let ok = self.outbound.send(message).is_ok();
        if !ok {
            debug!(name = %self.name, "dropping message for closing connection");
        }
        ok
    }

    /// The client's shape in its own pixel space.
    pub fn shape(&self) -> ScreenShape {
        ScreenShape::new(
            self.info.x as i32,
            self.info.y as i32,
            self.info.width as i32,
            self.info.height as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgehop_core::protocol::PROTOCOL_VERSION;

    fn proxy() -> (ClientProxy, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ClientProxy::new("laptop".to_string(), PROTOCOL_VERSION, tx, Instant::now()),
            rx,
        )
    }

    #[test]
    fn test_send_queues_on_outbound_channel() {
        let (proxy, mut rx) = proxy();
        assert!(proxy.send(Message::KeepAlive));
        assert_eq!(rx.try_recv().unwrap(), Message::KeepAlive);
    }

    #[test]
    fn test_send_reports_closed_connection() {
        let (proxy, rx) = proxy();
        drop(rx);
        assert!(!proxy.send(Message::KeepAlive));
    }

    #[test]
    fn test_shape_reflects_reported_info() {
        let (mut proxy, _rx) = proxy();
        proxy.info = ScreenInfo {
            x: 0,
            y: 0,
            width: 2560,
            height: 1440,
            cursor_x: 10,
            cursor_y: 20,
        };
        assert_eq!(proxy.shape(), ScreenShape::new(0, 0, 2560, 1440));
    }

    #[test]
    fn test_new_proxy_owns_no_clipboards() {
        let (proxy, _rx) = proxy();
        assert!(proxy.clipboard.iter().all(|slot| !slot.own && !slot.sent));
        assert!(!proxy.ready);
    }
}
