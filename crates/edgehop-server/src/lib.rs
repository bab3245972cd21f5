//! edgehop-server library entry point.
//!
//! Re-exports the engine, networking, and screen modules so integration
//! tests in `tests/` and the binary in `main.rs` share one module tree.

pub mod engine;
pub mod net;
pub mod screen;

pub use engine::{PrimaryEvent, ServerEngine, ServerEvent};
pub use net::client_proxy::{ClientProxy, ConnectionId};
pub use net::listener::{run_listener, ListenerSettings};
pub use screen::{MockPrimaryScreen, PrimaryScreen};
