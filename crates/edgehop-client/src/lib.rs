//! edgehop-client library entry point.
//!
//! Re-exports the connection, proxy, and screen modules so integration
//! tests in `tests/` and the binary in `main.rs` share one module tree.

pub mod connection;
pub mod screen;
pub mod server_proxy;

pub use connection::{
    run_client, CertificateChallenge, ClientError, ClientEvent, ClientSettings, NeverTrust,
};
pub use screen::{MockSecondaryScreen, ScreenCall, SecondaryScreen};
pub use server_proxy::{ServerProxy, SessionEnd};
