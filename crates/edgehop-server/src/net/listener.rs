//! Client listener and the not-yet-handshaked connection path.
//!
//! Each accepted socket gets one task. Until the hello exchange completes
//! the peer is an unknown client with a hard deadline; a connection that has
//! not finished `Hello → HelloBack → QINF → DINF → CIAK` within the window
//! is told `EBAD` and dropped. Version and name problems close with their
//! specific opcodes (`EICV`, `EUNK`, `EBSY`). After `CIAK` the task becomes
//! the connection's read/write pump for the engine.

use std::net::SocketAddr;
use std::time::Duration;

use edgehop_core::environment::Environment;
use edgehop_core::protocol::{
    FrameError, Message, PacketStream, ProtocolVersion, PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::engine::{RegisterError, ServerEvent, CLOSE_GRACE};
use crate::net::client_proxy::ConnectionId;
use crate::net::tls::{self, TlsAcceptor};
use crate::net::BoxedStream;

/// Default window for an unknown client to finish its handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors fatal to the listener itself.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Bind failure (address in use, no permission). Fatal for startup.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// What the listener needs to run.
pub struct ListenerSettings {
    pub address: SocketAddr,
    /// `None` runs plain TCP (`--disable-crypto`).
    pub tls: Option<TlsAcceptor>,
    /// Gate clients on the trusted-clients fingerprint store.
    pub verify_client_fingerprints: bool,
    pub environment: Environment,
    pub handshake_timeout: Duration,
}

/// A bound client listener.
pub struct Listener {
    inner: TcpListener,
    settings: ListenerSettings,
}

impl Listener {
    /// Binds the listen socket.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError::Bind`] when the address cannot be bound
    /// (address in use is fatal for server startup).
    pub async fn bind(settings: ListenerSettings) -> Result<Listener, ListenError> {
        let inner = TcpListener::bind(settings.address)
            .await
            .map_err(|source| ListenError::Bind {
                addr: settings.address,
                source,
            })?;
        info!(
            address = %settings.address,
            tls = settings.tls.is_some(),
            "listening for clients"
        );
        Ok(Listener { inner, settings })
    }

    /// The actual bound address (resolves an ephemeral port request).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accepts clients forever, handing established connections to the
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns [`ListenError::Accept`] when the accept loop itself fails.
    pub async fn run(self, engine: mpsc::Sender<ServerEvent>) -> Result<(), ListenError> {
        loop {
            let (stream, peer) = self.inner.accept().await.map_err(ListenError::Accept)?;
            debug!(%peer, "accepted connection");
            let tls = self.settings.tls.clone();
            let verify = self.settings.verify_client_fingerprints;
            let env = self.settings.environment.clone();
            let engine = engine.clone();
            let window = self.settings.handshake_timeout;
            tokio::spawn(async move {
                handle_connection(stream, peer, tls, verify, env, engine, window).await;
            });
        }
    }
}

/// Binds and runs a listener in one call.
///
/// # Errors
///
/// Returns [`ListenError`] for bind or accept failures.
pub async fn run_listener(
    settings: ListenerSettings,
    engine: mpsc::Sender<ServerEvent>,
) -> Result<(), ListenError> {
    Listener::bind(settings).await?.run(engine).await
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    verify_fingerprints: bool,
    env: Environment,
    engine: mpsc::Sender<ServerEvent>,
    window: Duration,
) {
    let stream = match secure(stream, peer, tls, verify_fingerprints, &env).await {
        Some(stream) => stream,
        None => return,
    };
    let mut packets = PacketStream::new(stream);

    let session = match timeout(window, handshake(&mut packets, &engine)).await {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(_) => {
            warn!(%peer, "handshake timed out");
            send_and_close(&mut packets, Message::ErrorBad).await;
            return;
        }
    };

    info!(%peer, screen = %session.name, version = %session.version, "client connected");
    serve(packets, session, engine).await;
}

async fn secure(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    verify_fingerprints: bool,
    env: &Environment,
) -> Option<BoxedStream> {
    match tls {
        None => Some(Box::new(stream)),
        Some(acceptor) => {
            let accepted = match acceptor.accept(stream).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(%peer, "TLS accept failed: {e}");
                    return None;
                }
            };
            if verify_fingerprints {
                let Some(fingerprint) = tls::peer_fingerprint(accepted.get_ref().1) else {
                    warn!(%peer, "client presented no certificate");
                    return None;
                };
                if !tls::is_client_trusted(env, &fingerprint) {
                    // Never auto-trust: the user must accept the fingerprint
                    // through the trust file before this client may connect.
                    warn!(%peer, %fingerprint, "client fingerprint is not trusted");
                    return None;
                }
            }
            Some(Box::new(accepted))
        }
    }
}

/// A connection that has completed the hello/info exchange.
struct Session {
    id: ConnectionId,
    name: String,
    version: ProtocolVersion,
    outbound: mpsc::UnboundedReceiver<Message>,
}

/// Runs the unknown-client exchange. Returns `None` when the peer was
/// rejected (the specific close opcode has already been sent).
async fn handshake(
    packets: &mut PacketStream<BoxedStream>,
    engine: &mpsc::Sender<ServerEvent>,
) -> Option<Session> {
    if !send(packets, Message::Hello {
        version: PROTOCOL_VERSION,
    })
    .await
    {
        return None;
    }

    let (peer_version, name) = match read(packets, PROTOCOL_VERSION).await? {
        Message::HelloBack { version, name } => (version, name),
        other => {
            warn!(opcode = other.name(), "expected hello reply");
            send_and_close(packets, Message::ErrorBad).await;
            return None;
        }
    };

    let version = match PROTOCOL_VERSION.negotiate(peer_version) {
        Ok(version) => version,
        Err(e) => {
            warn!("{e}");
            send_and_close(
                packets,
                Message::ErrorIncompatible {
                    version: PROTOCOL_VERSION,
                },
            )
            .await;
            return None;
        }
    };

    // Claim the screen name before asking for its shape.
    let (reply, registered) = oneshot::channel();
    let (outbound_tx, outbound) = mpsc::unbounded_channel();
    if engine
        .send(ServerEvent::Register {
            name: name.clone(),
            version,
            outbound: outbound_tx,
            reply,
        })
        .await
        .is_err()
    {
        return None;
    }
    let id = match registered.await {
        Ok(Ok(id)) => id,
        Ok(Err(RegisterError::NameUnknown(name))) => {
            warn!(screen = %name, "unknown screen name");
            send_and_close(packets, Message::ErrorUnknown).await;
            return None;
        }
        Ok(Err(RegisterError::NameInUse(name))) => {
            warn!(screen = %name, "screen name already connected");
            send_and_close(packets, Message::ErrorBusy).await;
            return None;
        }
        Err(_) => return None,
    };

    if !send(packets, Message::QueryInfo).await {
        fail(engine, id, "stream closed during handshake").await;
        return None;
    }
    let info = loop {
        match read(packets, version).await {
            Some(Message::Info(info)) => break info,
            Some(Message::Noop | Message::KeepAlive) => continue,
            Some(other) => {
                warn!(opcode = other.name(), "expected screen info");
                send_and_close(packets, Message::ErrorBad).await;
                fail(engine, id, "protocol error in handshake").await;
                return None;
            }
            None => {
                fail(engine, id, "stream closed during handshake").await;
                return None;
            }
        }
    };
    // Mark the connection active before acknowledging, so anything queued
    // behind the ack already finds it in the engine's tables.
    let _ = engine.send(ServerEvent::Ready { id, info }).await;
    if !send(packets, Message::InfoAck).await {
        fail(engine, id, "stream closed during handshake").await;
        return None;
    }

    Some(Session {
        id,
        name,
        version,
        outbound,
    })
}

/// Pumps frames in both directions until either side closes.
async fn serve(
    mut packets: PacketStream<BoxedStream>,
    mut session: Session,
    engine: mpsc::Sender<ServerEvent>,
) {
    let id = session.id;
    let version = session.version;
    let reason;

    loop {
        tokio::select! {
            inbound = packets.read_message() => match inbound {
                Ok(Some(frame)) => match Message::parse(&frame, version) {
                    Ok(message) => {
                        let closing = message == Message::Close;
                        let _ = engine.send(ServerEvent::Message { id, message }).await;
                        if closing {
                            reason = "peer closed".to_string();
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(screen = %session.name, "protocol error: {e}");
                        send_and_close(&mut packets, Message::ErrorBad).await;
                        reason = format!("protocol error: {e}");
                        break;
                    }
                },
                Ok(None) => {
                    reason = "stream closed".to_string();
                    break;
                }
                Err(e) => {
                    reason = format!("stream error: {e}");
                    break;
                }
            },
            queued = session.outbound.recv() => match queued {
                Some(message) => {
                    if let Err(e) = write(&mut packets, &message, version).await {
                        reason = format!("write failed: {e}");
                        break;
                    }
                }
                None => {
                    // The engine dropped this connection; let buffered
                    // writes drain briefly, then force the socket closed.
                    let _ = timeout(CLOSE_GRACE, packets.shutdown()).await;
                    reason = "closed by engine".to_string();
                    break;
                }
            },
        }
    }

    let _ = engine
        .send(ServerEvent::Disconnected { id, reason })
        .await;
}

// ── Small helpers ─────────────────────────────────────────────────────────────

async fn read(
    packets: &mut PacketStream<BoxedStream>,
    version: ProtocolVersion,
) -> Option<Message> {
    match packets.read_message().await {
        Ok(Some(frame)) => match Message::parse(&frame, version) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("protocol error: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            debug!("stream error: {e}");
            None
        }
    }
}

async fn send(packets: &mut PacketStream<BoxedStream>, message: Message) -> bool {
    write(packets, &message, PROTOCOL_VERSION).await.is_ok()
}

async fn write(
    packets: &mut PacketStream<BoxedStream>,
    message: &Message,
    version: ProtocolVersion,
) -> Result<(), FrameError> {
    let payload = message.encode(version)?;
    packets.write_message(&payload).await
}

/// Sends a close opcode, then gives the socket a moment to drain.
async fn send_and_close(packets: &mut PacketStream<BoxedStream>, message: Message) {
    let _ = write(packets, &message, PROTOCOL_VERSION).await;
    let _ = timeout(CLOSE_GRACE, packets.shutdown()).await;
}

async fn fail(engine: &mpsc::Sender<ServerEvent>, id: ConnectionId, reason: &str) {
    let _ = engine
        .send(ServerEvent::Disconnected {
            id,
            reason: reason.to_string(),
        })
        .await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
