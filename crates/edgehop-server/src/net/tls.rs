//! Server-side trust decisions over the shared TLS plumbing.
//!
//! Identity management, the acceptor, and the deferred-verification layer
//! live in [`edgehop_core::tls`]; this module adds the server's lookup
//! against the trusted-clients fingerprint store.

pub use edgehop_core::tls::{
    load_or_generate_identity, peer_fingerprint, server_acceptor, TlsAcceptor, TlsError,
    TlsIdentity,
};

use edgehop_core::environment::Environment;
use edgehop_core::fingerprint::{Fingerprint, FingerprintDatabase};
use tracing::warn;

/// Checks a client fingerprint against the trusted-clients store. Unknown
/// fingerprints are never auto-trusted; the user must add them through the
/// accept flow first.
pub fn is_client_trusted(env: &Environment, fingerprint: &Fingerprint) -> bool {
    match FingerprintDatabase::load(&env.trusted_clients_path()) {
        Ok(db) => db.is_trusted(fingerprint),
        Err(e) => {
            warn!("cannot read trusted clients: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrusted_client_fingerprint_is_rejected() {
        let dir = std::env::temp_dir().join(format!("edgehop-trust-{}", std::process::id()));
        let env = Environment::at(&dir);
        std::fs::remove_dir_all(&dir).ok();

        let fp = Fingerprint::sha256_of_der(b"client");
        assert!(!is_client_trusted(&env, &fp));

        let mut db = FingerprintDatabase::new();
        db.add_trusted(fp.clone());
        db.save(&env.trusted_clients_path()).unwrap();
        assert!(is_client_trusted(&env, &fp));

        std::fs::remove_dir_all(&dir).ok();
    }
}
