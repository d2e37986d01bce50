use thiserror::Error;

use exchange::ExchangeError;

/// Failures from dialing, handshaking, or authenticating a connection. Always carries enough
/// context to render the "when sending a request to '<uri>', before the request" prefix callers
/// expect whenever the failure happened prior to sending the request body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("when sending a request to '{uri}', before the request: {source}")]
    Connect {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error("when sending a request to '{uri}', before the request: TLS handshake failed: {source}")]
    Handshake {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "when sending a request to '{uri}', before the request: the remote certificate's \
         thumbprint '{got}' does not match the expected thumbprint '{expected}'"
    )]
    ThumbprintMismatch { uri: String, expected: String, got: String },

    #[error("the remote presented no certificate during the TLS handshake")]
    NoPeerCertificate,

    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}
