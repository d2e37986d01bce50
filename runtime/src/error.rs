use thiserror::Error;

use exchange::ExchangeError;
use transport::TransportError;
use wire::RemoteError;

/// The single error type callers of the runtime's client surface see. Wraps whichever layer
/// actually failed; `Display` renders the human message, and [`ClientError::remote`] exposes the
/// remote stack rendering when the failure came from a handler on the other end.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("{0}")]
    Remote(RemoteError),
}

impl From<RemoteError> for ClientError {
    fn from(error: RemoteError) -> Self {
        ClientError::Remote(error)
    }
}

impl ClientError {
    /// The remote error's structured fields, when this failure is the far side's handler having
    /// raised rather than a local transport/protocol failure.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ClientError::Remote(error) => Some(error),
            _ => None,
        }
    }
}

/// Failures loading or parsing a [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serdeconv::Error),

    #[error("no certificate found in '{0}'")]
    MissingCertificate(String),

    #[error("no private key found in '{0}'")]
    MissingPrivateKey(String),

    #[error("invalid PEM content in '{path}': {message}")]
    InvalidPem { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
