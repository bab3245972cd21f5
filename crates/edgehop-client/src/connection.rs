//! Client connection management: connect, secure, handshake, and the
//! session loop, with automatic reconnection.
//!
//! The TCP connect has a hard deadline; TLS servers are authenticated
//! purely by their certificate's SHA-256 fingerprint against the
//! trusted-servers store, with unknown fingerprints surfaced through
//! [`CertificateChallenge`] and never auto-trusted. A session that ends in
//! a restartable way (stream drop, keep-alive flatline, incompatible
//! version) schedules a reconnect; name conflicts and fingerprint
//! rejections stop the client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use edgehop_core::clipboard::ClipboardId;
use edgehop_core::environment::Environment;
use edgehop_core::fingerprint::{Fingerprint, FingerprintDatabase};
use edgehop_core::protocol::{
    FrameError, Message, PacketStream, PROTOCOL_VERSION,
};
use edgehop_core::tls::{self, TlsError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout};
use tracing::{debug, info, warn};

use crate::screen::SecondaryScreen;
use crate::server_proxy::{ServerProxy, SessionEnd};

/// How long one TCP connect may take before it is retried.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause between reconnect attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors that stop the client (everything else reconnects).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// The server's fingerprint was not trusted and the challenge declined
    /// it.
    #[error("server fingerprint {0} is not trusted")]
    FingerprintRejected(Fingerprint),
    /// The server refused our screen name; reconnecting cannot help until
    /// the configuration changes.
    #[error("server refused the connection: {0}")]
    Refused(&'static str),
    /// The local event channel closed; the application is shutting down.
    #[error("client shut down")]
    Stopped,
}

/// Local happenings the connection must relay to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// A local application grabbed a clipboard slot.
    ClipboardGrabbed(ClipboardId),
    /// The local screen's resolution or position changed.
    ShapeChanged,
}

/// Decides whether to trust a fingerprint seen for the first time. The
/// interactive accept dialog lives outside this crate; headless runs use
/// [`NeverTrust`].
#[async_trait]
pub trait CertificateChallenge: Send + Sync {
    async fn accept_server(&self, fingerprint: &Fingerprint) -> bool;
}

/// Refuses every unknown fingerprint.
pub struct NeverTrust;

#[async_trait]
impl CertificateChallenge for NeverTrust {
    async fn accept_server(&self, _fingerprint: &Fingerprint) -> bool {
        false
    }
}

/// Connection settings.
pub struct ClientSettings {
    /// Server host name or address.
    pub host: String,
    pub port: u16,
    /// Our screen name, sent in the hello reply.
    pub name: String,
    pub environment: Environment,
    pub connect_timeout: Duration,
    pub retry_delay: Duration,
}

/// Runs the client until a fatal error or local shutdown.
///
/// # Errors
///
/// Returns [`ClientError`] for unrecoverable conditions; restartable
/// failures are logged and retried internally.
pub async fn run_client<S, C>(
    settings: ClientSettings,
    screen: S,
    challenge: C,
    mut events: mpsc::Receiver<ClientEvent>,
) -> Result<(), ClientError>
where
    S: SecondaryScreen,
    C: CertificateChallenge,
{
    let connector = if settings.environment.crypto_enabled {
        let identity = tls::load_or_generate_identity(&settings.environment)?;
        info!(fingerprint = %identity.fingerprint, "client certificate ready");
        Some(tls::client_connector(identity)?)
    } else {
        info!("crypto disabled; speaking plain TCP");
        None
    };

    let mut proxy = ServerProxy::new(screen, Instant::now());
    loop {
        match connect_once(&settings, &connector, &challenge, &mut proxy, &mut events).await {
            Ok(()) => return Ok(()),
            Err(retry) => {
                if let Some(fatal) = retry.fatal {
                    return Err(fatal);
                }
                debug!(delay = ?settings.retry_delay, "reconnecting");
                sleep(settings.retry_delay).await;
            }
        }
    }
}

/// A failed attempt: fatal stops the client, otherwise reconnect.
struct Retry {
    fatal: Option<ClientError>,
}

impl Retry {
    fn again() -> Self {
        Self { fatal: None }
    }

    fn fatal(error: ClientError) -> Self {
        Self { fatal: Some(error) }
    }
}

async fn connect_once<S, C>(
    settings: &ClientSettings,
    connector: &Option<tls::TlsConnector>,
    challenge: &C,
    proxy: &mut ServerProxy<S>,
    events: &mut mpsc::Receiver<ClientEvent>,
) -> Result<(), Retry>
where
    S: SecondaryScreen,
    C: CertificateChallenge,
{
    let address = format!("{}:{}", settings.host, settings.port);
    info!(%address, "connecting to server");
    let stream = match timeout(
        settings.connect_timeout,
        TcpStream::connect((settings.host.as_str(), settings.port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(%address, "connect failed: {e}");
            return Err(Retry::again());
        }
        Err(_) => {
            warn!(%address, "connect timed out");
            return Err(Retry::again());
        }
    };

    match connector {
        None => session(settings, proxy, events, PacketStream::new(stream)).await,
        Some(connector) => {
            let name = match tls::server_name(&settings.host) {
                Ok(name) => name,
                Err(e) => return Err(Retry::fatal(e.into())),
            };
            let secured = match connector.connect(name, stream).await {
                Ok(secured) => secured,
                Err(e) => {
                    warn!("TLS connect failed: {e}");
                    return Err(Retry::again());
                }
            };
            let fingerprint = tls::peer_fingerprint(secured.get_ref().1);
            verify_server(settings, challenge, fingerprint).await?;
            session(settings, proxy, events, PacketStream::new(secured)).await
        }
    }
}

/// Compares the server's fingerprint against the trust store, consulting
/// the challenge for first-time fingerprints.
async fn verify_server<C: CertificateChallenge>(
    settings: &ClientSettings,
    challenge: &C,
    fingerprint: Option<Fingerprint>,
) -> Result<(), Retry> {
    let Some(fingerprint) = fingerprint else {
        warn!("server presented no certificate");
        return Err(Retry::again());
    };
    let path = settings.environment.trusted_servers_path();
    let mut db = match FingerprintDatabase::load(&path) {
        Ok(db) => db,
        Err(e) => {
            warn!("cannot read trusted servers: {e}");
            FingerprintDatabase::new()
        }
    };
    if db.is_trusted(&fingerprint) {
        return Ok(());
    }
    info!(%fingerprint, "server fingerprint seen for the first time");
    if challenge.accept_server(&fingerprint).await {
        db.add_trusted(fingerprint);
        if let Err(e) = db.save(&path) {
            warn!("cannot persist trusted servers: {e}");
        }
        return Ok(());
    }
    Err(Retry::fatal(ClientError::FingerprintRejected(fingerprint)))
}

/// Drives one established connection: hello exchange, then the message
/// pump with keep-alive bookkeeping.
async fn session<S, T>(
    settings: &ClientSettings,
    proxy: &mut ServerProxy<S>,
    events: &mut mpsc::Receiver<ClientEvent>,
    mut packets: PacketStream<T>,
) -> Result<(), Retry>
where
    S: SecondaryScreen,
    T: AsyncRead + AsyncWrite + Unpin,
{
    proxy.reset(Instant::now());

    // The server speaks first.
    let version = match read_message(&mut packets).await {
        Some(Message::Hello { version }) => match PROTOCOL_VERSION.negotiate(version) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                warn!("{e}; will retry");
                return Err(Retry::again());
            }
        },
        Some(other) => {
            warn!(opcode = other.name(), "expected hello from server");
            return Err(Retry::again());
        }
        None => return Err(Retry::again()),
    };
    if write_all(
        &mut packets,
        &[Message::HelloBack {
            version: PROTOCOL_VERSION,
            name: settings.name.clone(),
        }],
        version,
    )
    .await
    .is_err()
    {
        return Err(Retry::again());
    }
    info!(version = %version, "hello exchanged");

    loop {
        let next_send = proxy.keepalive.next_send();
        let deadline = proxy.keepalive.deadline();
        tokio::select! {
            inbound = packets.read_message() => {
                let frame = match inbound {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        info!("server closed the stream");
                        return Err(Retry::again());
                    }
                    Err(e) => {
                        warn!("stream error: {e}");
                        return Err(Retry::again());
                    }
                };
                let message = match Message::parse(&frame, version) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("protocol error: {e}");
                        return Err(Retry::again());
                    }
                };
                match proxy.handle(message, Instant::now()) {
                    Ok(replies) => {
                        if write_all(&mut packets, &replies, version).await.is_err() {
                            return Err(Retry::again());
                        }
                    }
                    Err(end) => return finish(end),
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    let _ = write_all(&mut packets, &[Message::Close], version).await;
                    return Err(Retry::fatal(ClientError::Stopped));
                };
                let messages = match event {
                    ClientEvent::ClipboardGrabbed(id) => proxy.local_clipboard_grabbed(id),
                    ClientEvent::ShapeChanged => proxy.shape_changed(),
                };
                if write_all(&mut packets, &messages, version).await.is_err() {
                    return Err(Retry::again());
                }
            }
            _ = sleep_until(next_send.into()) => {
                if write_all(&mut packets, &[Message::KeepAlive], version).await.is_err() {
                    return Err(Retry::again());
                }
                proxy.keepalive.record_sent(Instant::now());
            }
            _ = sleep_until(deadline.into()) => {
                info!("no frames within the keep-alive deadline; reconnecting");
                return Err(Retry::again());
            }
        }
    }
}

fn finish(end: SessionEnd) -> Result<(), Retry> {
    match end {
        SessionEnd::Refused(reason) => Err(Retry::fatal(ClientError::Refused(reason))),
        end => {
            info!("session ended: {end}; will retry");
            Err(Retry::again())
        }
    }
}

async fn read_message<T: AsyncRead + AsyncWrite + Unpin>(
    packets: &mut PacketStream<T>,
) -> Option<Message> {
    match packets.read_message().await {
        Ok(Some(frame)) => match Message::parse(&frame, PROTOCOL_VERSION) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("protocol error: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("stream error: {e}");
            None
        }
    }
}

async fn write_all<T: AsyncRead + AsyncWrite + Unpin>(
    packets: &mut PacketStream<T>,
    messages: &[Message],
    version: edgehop_core::protocol::ProtocolVersion,
) -> Result<(), FrameError> {
    for message in messages {
        let payload = message.encode(version)?;
        packets.write_message(&payload).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_never_trust_declines() {
        let fp = Fingerprint::sha256_of_der(b"server");
        assert!(!NeverTrust.accept_server(&fp).await);
    }

    #[test]
    fn test_retry_classification() {
        assert!(Retry::again().fatal.is_none());
        assert!(Retry::fatal(ClientError::Stopped).fatal.is_some());
    }
}
