//! Socket-level integration tests: a scripted client speaks the real wire
//! protocol to the listener + engine over loopback TCP.
//!
//! Covered here:
//! - The full unknown-client handshake: `Hello → HelloBack → QINF → DINF →
//!   CIAK`, ending with an active connection.
//! - Version rejection (`EICV`) for a too-old client.
//! - Name rejection (`EUNK` for an undeclared screen, `EBSY` for a name
//!   that is already connected).
//! - A switch observed from the client side: `CINN` with the first enter
//!   sequence after the cursor crosses the right jump zone.

use edgehop_core::config::parse_config;
use edgehop_core::environment::Environment;
use edgehop_core::protocol::{
    Message, PacketStream, ProtocolVersion, ScreenInfo, PROTOCOL_VERSION,
};
use edgehop_server::engine::{PrimaryEvent, ServerEngine, ServerEvent};
use edgehop_server::net::listener::{Listener, ListenerSettings, HANDSHAKE_TIMEOUT};
use edgehop_server::screen::MockPrimaryScreen;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

const CONFIG: &str = r#"
section: screens
  primary:
  laptop:
end
section: links
  primary:
    right = laptop
  laptop:
    left = primary
end
"#;

async fn start_server() -> (SocketAddr, mpsc::Sender<ServerEvent>) {
    let config = parse_config(CONFIG).unwrap();
    let engine = ServerEngine::new(
        config,
        "primary".to_string(),
        MockPrimaryScreen::new(1920, 1080),
    );
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(engine.run(rx));

    let listener = Listener::bind(ListenerSettings {
        address: "127.0.0.1:0".parse().unwrap(),
        tls: None,
        verify_client_fingerprints: false,
        environment: Environment::at("/tmp/edgehop-integration"),
        handshake_timeout: HANDSHAKE_TIMEOUT,
    })
    .await
    .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run(tx.clone()));
    (addr, tx)
}

struct ScriptedClient {
    packets: PacketStream<TcpStream>,
    version: ProtocolVersion,
}

impl ScriptedClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            packets: PacketStream::new(stream),
            version: PROTOCOL_VERSION,
        }
    }

    async fn read(&mut self) -> Option<Message> {
        let frame = timeout(Duration::from_secs(5), self.packets.read_message())
            .await
            .expect("read timed out")
            .expect("stream error")?;
        Some(Message::parse(&frame, self.version).expect("bad frame from server"))
    }

    async fn send(&mut self, message: Message) {
        let payload = message.encode(self.version).unwrap();
        self.packets.write_message(&payload).await.unwrap();
    }

    /// Runs the client half of the handshake up to `CIAK`.
    async fn handshake(&mut self, name: &str, width: u16, height: u16) {
        let hello = self.read().await.expect("no hello");
        assert!(matches!(hello, Message::Hello { .. }));
        self.send(Message::HelloBack {
            version: PROTOCOL_VERSION,
            name: name.to_string(),
        })
        .await;
        let query = self.read().await.expect("no info query");
        assert_eq!(query, Message::QueryInfo);
        self.send(Message::Info(ScreenInfo {
            x: 0,
            y: 0,
            width,
            height,
            cursor_x: 0,
            cursor_y: 0,
        }))
        .await;
        let ack = self.read().await.expect("no info ack");
        assert_eq!(ack, Message::InfoAck);
    }

    /// Reads until a message other than `DSOP`/`CALV`/`CNOP` arrives.
    async fn read_significant(&mut self) -> Option<Message> {
        loop {
            match self.read().await? {
                Message::SetOptions { .. } | Message::KeepAlive | Message::Noop => continue,
                other => return Some(other),
            }
        }
    }
}

#[tokio::test]
async fn test_full_handshake_reaches_active() {
    let (addr, _engine) = start_server().await;
    let mut client = ScriptedClient::connect(addr).await;
    client.handshake("laptop", 2560, 1440).await;
}

#[tokio::test]
async fn test_old_client_version_is_rejected_with_eicv() {
    let (addr, _engine) = start_server().await;
    let mut client = ScriptedClient::connect(addr).await;

    let hello = client.read().await.expect("no hello");
    assert!(matches!(hello, Message::Hello { .. }));
    client
        .send(Message::HelloBack {
            version: ProtocolVersion::new(1, 2),
            name: "laptop".to_string(),
        })
        .await;

    let reply = client.read().await.expect("no rejection");
    assert_eq!(
        reply,
        Message::ErrorIncompatible {
            version: PROTOCOL_VERSION
        }
    );
    // The server closes after the error opcode.
    assert!(client.read().await.is_none());
}

#[tokio::test]
async fn test_undeclared_screen_name_is_rejected_with_eunk() {
    let (addr, _engine) = start_server().await;
    let mut client = ScriptedClient::connect(addr).await;

    client.read().await.expect("no hello");
    client
        .send(Message::HelloBack {
            version: PROTOCOL_VERSION,
            name: "ghost".to_string(),
        })
        .await;

    assert_eq!(client.read().await, Some(Message::ErrorUnknown));
    assert!(client.read().await.is_none());
}

#[tokio::test]
async fn test_second_connection_with_same_name_is_rejected_with_ebsy() {
    let (addr, _engine) = start_server().await;
    let mut first = ScriptedClient::connect(addr).await;
    first.handshake("laptop", 2560, 1440).await;

    let mut second = ScriptedClient::connect(addr).await;
    second.read().await.expect("no hello");
    second
        .send(Message::HelloBack {
            version: PROTOCOL_VERSION,
            name: "laptop".to_string(),
        })
        .await;

    assert_eq!(second.read().await, Some(Message::ErrorBusy));
    assert!(second.read().await.is_none());
}

#[tokio::test]
async fn test_zone_crossing_delivers_enter_with_first_sequence() {
    let (addr, engine) = start_server().await;
    let mut client = ScriptedClient::connect(addr).await;
    client.handshake("laptop", 2560, 1440).await;

    // Drive the cursor into the right jump zone at mid-height.
    engine
        .send(ServerEvent::Primary(PrimaryEvent::Motion { x: 1919, y: 540 }))
        .await
        .unwrap();

    let entered = client.read_significant().await.expect("no enter");
    let Message::Enter {
        x,
        y,
        sequence,
        mask,
        for_screensaver,
    } = entered
    else {
        panic!("expected CINN, got {entered:?}");
    };
    assert_eq!(x, 1);
    assert_eq!(y, 720);
    assert_eq!(sequence, 1);
    assert_eq!(mask, 0);
    assert_eq!(for_screensaver, None);

    // Key events now route to this screen.
    engine
        .send(ServerEvent::Primary(PrimaryEvent::KeyDown {
            key: 0x61,
            mask: 0,
            button: 0x1E,
        }))
        .await
        .unwrap();
    let key = client.read_significant().await.expect("no key event");
    assert_eq!(
        key,
        Message::KeyDown {
            key: 0x61,
            mask: 0,
            button: 0x1E
        }
    );
}

#[tokio::test]
async fn test_graceful_close_from_client_releases_the_name() {
    let (addr, _engine) = start_server().await;
    let mut client = ScriptedClient::connect(addr).await;
    client.handshake("laptop", 2560, 1440).await;
    client.send(Message::Close).await;
    drop(client);

    // Give the engine a moment to unregister, then the name is free again.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut second = ScriptedClient::connect(addr).await;
    second.handshake("laptop", 2560, 1440).await;
}
