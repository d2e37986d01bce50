//! Trust here is not PKI: a peer's certificate chain is accepted structurally (no CA, no
//! hostname, no validity-window checks) and the real authentication happens one layer up, after
//! the handshake completes, by comparing the peer's leaf certificate thumbprint against the
//! configured expectation (the endpoint's thumbprint on the client side, the trust set on the
//! listener side). These verifiers exist only to satisfy rustls's requirement that *something*
//! implement the verification traits; see [`peer_thumbprint`] for the check that actually matters.

use std::sync::{Arc, Once};

use rustls::client::danger::{HandshakeSignatureValid as ClientSigValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, Error as RustlsError, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

use wire::Thumbprint;

use crate::error::TransportError;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

static INSTALL_PROVIDER: Once = Once::new();

/// Installs `ring` as the process-wide default rustls crypto provider. Idempotent; every
/// constructor in this module calls it, so callers never need to invoke it themselves.
fn ensure_provider_installed() {
    INSTALL_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Accepts any server certificate chain; the caller compares [`peer_thumbprint`] against the
/// endpoint's expected value afterward.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    pub fn new() -> Arc<Self> {
        Arc::new(AcceptAnyServerCert { provider: provider() })
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<ClientSigValid, RustlsError> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<ClientSigValid, RustlsError> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Accepts any client certificate chain presented during mutual TLS, as long as one is presented
/// at all; thumbprint comparison against the trust set happens after the handshake in
/// [`crate::listener::SecureListener`].
#[derive(Debug)]
pub struct AcceptAnyClientCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyClientCert {
    pub fn new() -> Arc<Self> {
        Arc::new(AcceptAnyClientCert { provider: provider() })
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, RustlsError> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<ClientSigValid, RustlsError> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<ClientSigValid, RustlsError> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// The runtime's own identity: the certificate chain and private key presented on both the
/// listening side (as a server) and the dialing side (as a mutually-authenticated client).
#[derive(Clone)]
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: Arc<rustls::pki_types::PrivateKeyDer<'static>>,
}

pub fn server_tls_config(identity: &Identity) -> Result<Arc<rustls::ServerConfig>, TransportError> {
    ensure_provider_installed();
    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(AcceptAnyClientCert::new())
        .with_single_cert(identity.cert_chain.clone(), identity.key.clone_key())?;
    Ok(Arc::new(config))
}

pub fn client_tls_config(identity: &Identity) -> Result<Arc<rustls::ClientConfig>, TransportError> {
    ensure_provider_installed();
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(AcceptAnyServerCert::new())
        .with_client_auth_cert(identity.cert_chain.clone(), identity.key.clone_key())?;
    Ok(Arc::new(config))
}

/// Reads the leaf certificate the peer presented and thumbprints it. Called immediately after the
/// handshake, before any envelope is read — a mismatch here must close the connection first.
pub fn peer_thumbprint_server(stream: &ServerTlsStream<TcpStream>) -> Result<Thumbprint, TransportError> {
    let certs = stream.get_ref().1.peer_certificates().ok_or(TransportError::NoPeerCertificate)?;
    let leaf = certs.first().ok_or(TransportError::NoPeerCertificate)?;
    Ok(Thumbprint::of_der_certificate(leaf.as_ref()))
}

pub fn peer_thumbprint_client(stream: &ClientTlsStream<TcpStream>) -> Result<Thumbprint, TransportError> {
    let certs = stream.get_ref().1.peer_certificates().ok_or(TransportError::NoPeerCertificate)?;
    let leaf = certs.first().ok_or(TransportError::NoPeerCertificate)?;
    Ok(Thumbprint::of_der_certificate(leaf.as_ref()))
}
