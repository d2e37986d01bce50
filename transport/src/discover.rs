//! Opens a short-lived TLS-only connection to read a remote's certificate thumbprint without
//! exchanging any envelopes — enough to populate an [`Endpoint`] for a peer whose thumbprint
//! wasn't already known out of band.

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use wire::Endpoint;

use crate::error::TransportError;
use crate::tls::{self, Identity};

/// Dials `base_uri`, performs the TLS handshake (accepting any certificate chain structurally,
/// same as a real transaction would), reads the leaf certificate thumbprint, and closes the
/// connection — no identification frame is written.
pub async fn discover(base_uri: &str, identity: &Identity) -> Result<Endpoint, TransportError> {
    let authority = base_uri
        .strip_prefix("https://")
        .unwrap_or(base_uri)
        .trim_end_matches('/');

    let tcp = TcpStream::connect(authority)
        .await
        .map_err(|source| TransportError::Connect { uri: base_uri.to_string(), source })?;

    let host = authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority);
    let server_name = ServerName::try_from(host.to_string()).map_err(|_| TransportError::Handshake {
        uri: base_uri.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a valid server name"),
    })?;

    let tls_config = tls::client_tls_config(identity)?;
    let connector = TlsConnector::from(tls_config);
    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|source| TransportError::Handshake { uri: base_uri.to_string(), source })?;

    let thumbprint = tls::peer_thumbprint_client(&tls_stream)?;
    // `tls_stream` is dropped here, closing the connection; discovery never reads an envelope.
    Ok(Endpoint::https(base_uri, thumbprint))
}
