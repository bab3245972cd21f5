//! Networking: the listener, per-connection handshake, and proxy state.

pub mod client_proxy;
pub mod listener;
pub mod tls;

use tokio::io::{AsyncRead, AsyncWrite};

/// Object-safe byte stream, so plain TCP and TLS connections share the
/// framing and handshake code.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A connection's transport, TCP or TLS.
pub type BoxedStream = Box<dyn AsyncStream>;
