//! TLS identities, acceptors, and connectors.
//!
//! Peers authenticate each other with certificate fingerprints, not a PKI.
//! Both sides present a self-signed certificate generated on first run and
//! persisted under the profile directory (`SSL/Edgehop.pem`); the TLS layer
//! accepts any presented chain and the application compares the peer's
//! SHA-256 fingerprint against the relevant trust store after the
//! handshake, so an unknown peer can be surfaced to the user instead of
//! failing opaquely inside TLS.

use std::io::Write;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use thiserror::Error;
use tracing::info;

pub use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::environment::Environment;
use crate::fingerprint::{Fingerprint, FingerprintDatabase, FingerprintError};

/// Errors raised while preparing a TLS identity, acceptor, or connector.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot access certificate at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),
    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
    #[error("fingerprint store: {0}")]
    Fingerprints(#[from] FingerprintError),
}

/// A certificate, its private key, and its own fingerprint.
pub struct TlsIdentity {
    pub certificate: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
    pub fingerprint: Fingerprint,
}

/// Loads the persisted identity, or generates and persists a fresh one when
/// the PEM file is missing or unreadable. The local fingerprint file is
/// refreshed either way so accept dialogs can show it.
///
/// # Errors
///
/// Returns [`TlsError`] when the identity can neither be loaded nor
/// regenerated, which is fatal for startup.
pub fn load_or_generate_identity(env: &Environment) -> Result<TlsIdentity, TlsError> {
    let path = env.certificate_path();
    let identity = match load_identity_pem(env) {
        Some(identity) => identity,
        None => {
            info!(path = %path.display(), "generating a new self-signed certificate");
            generate_identity(env)?
        }
    };

    let mut local = FingerprintDatabase::new();
    local.add_trusted(identity.fingerprint.clone());
    local.save(&env.local_fingerprints_path())?;
    Ok(identity)
}

fn load_identity_pem(env: &Environment) -> Option<TlsIdentity> {
    let pem = std::fs::read(env.certificate_path()).ok()?;
    let mut reader = std::io::Cursor::new(&pem);
    let certificate = rustls_pemfile::certs(&mut reader).next()?.ok()?;
    let mut reader = std::io::Cursor::new(&pem);
    let key = rustls_pemfile::private_key(&mut reader).ok().flatten()?;
    let fingerprint = Fingerprint::sha256_of_der(&certificate);
    Some(TlsIdentity {
        certificate,
        key,
        fingerprint,
    })
}

fn generate_identity(env: &Environment) -> Result<TlsIdentity, TlsError> {
    let certified = rcgen::generate_simple_self_signed(vec!["edgehop".to_string()])?;
    let path = env.certificate_path();
    let io_err = |source| TlsError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_err)?;
    }
    let mut file = std::fs::File::create(&path).map_err(io_err)?;
    file.write_all(certified.cert.pem().as_bytes())
        .map_err(io_err)?;
    file.write_all(certified.key_pair.serialize_pem().as_bytes())
        .map_err(io_err)?;

    let certificate = certified.cert.der().clone();
    let fingerprint = Fingerprint::sha256_of_der(&certificate);
    let key = PrivateKeyDer::try_from(certified.key_pair.serialize_der())
        .map_err(|e| rustls::Error::General(e.to_string()))?;
    Ok(TlsIdentity {
        certificate,
        key,
        fingerprint,
    })
}

/// Builds a server acceptor. With `require_client_certificate` the
/// handshake demands a client certificate (trust itself is decided later
/// against the fingerprint store); without it clients connect anonymously.
///
/// # Errors
///
/// Returns [`TlsError::Config`] when rustls rejects the identity.
pub fn server_acceptor(
    identity: TlsIdentity,
    require_client_certificate: bool,
) -> Result<TlsAcceptor, TlsError> {
    let builder = rustls::ServerConfig::builder();
    let config = if require_client_certificate {
        builder
            .with_client_cert_verifier(Arc::new(DeferToFingerprints::new()))
            .with_single_cert(vec![identity.certificate], identity.key)?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(vec![identity.certificate], identity.key)?
    };
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builds a client connector that presents `identity` and accepts any
/// server certificate; callers must check the server's fingerprint after
/// the handshake.
///
/// # Errors
///
/// Returns [`TlsError::Config`] when rustls rejects the identity.
pub fn client_connector(identity: TlsIdentity) -> Result<TlsConnector, TlsError> {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DeferToFingerprints::new()))
        .with_client_auth_cert(vec![identity.certificate], identity.key)?;
    Ok(TlsConnector::from(Arc::new(config)))
}

/// A server name acceptable to rustls for a fingerprint-verified peer; the
/// name itself never participates in trust decisions.
///
/// # Errors
///
/// Returns [`TlsError::Config`] for a syntactically invalid host.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TlsError::Config(rustls::Error::General(e.to_string())))
}

/// Extracts the peer's SHA-256 fingerprint after a completed handshake.
pub fn peer_fingerprint(connection: &rustls::CommonState) -> Option<Fingerprint> {
    connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| Fingerprint::sha256_of_der(cert))
}

/// A certificate verifier that accepts any chain, deferring the trust
/// decision to the post-handshake fingerprint comparison.
#[derive(Debug)]
struct DeferToFingerprints {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl DeferToFingerprints {
    fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

impl ClientCertVerifier for DeferToFingerprints {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ServerCertVerifier for DeferToFingerprints {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
