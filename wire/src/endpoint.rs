use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// A certificate's identity on the wire: the SHA-256 digest of the DER-encoded leaf certificate,
/// rendered as uppercase hex. Equality and hashing are case-insensitive by construction — the
/// bytes are the canonical form, the hex string is only ever a presentation detail.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Thumbprint([u8; 32]);

impl Thumbprint {
    pub fn of_der_certificate(der: &[u8]) -> Thumbprint {
        let digest = Sha256::digest(der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Thumbprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({self})")
    }
}

impl FromStr for Thumbprint {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.trim();
        if cleaned.len() != 64 {
            return Err(ProtocolError::BadThumbprint(s.to_string()));
        }

        let mut bytes = [0u8; 32];
        for (i, chunk) in cleaned.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| ProtocolError::BadThumbprint(s.to_string()))?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| ProtocolError::BadThumbprint(s.to_string()))?;
        }

        Ok(Thumbprint(bytes))
    }
}

/// Transport scheme an [`Endpoint`] resolves under. `Https` dials a TLS listener; `Poll` resolves
/// through a [`PendingRequestQueue`](../exchange/queue/struct.PendingRequestQueue.html) keyed by
/// the subscription URI instead of opening a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Https,
    Poll,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Https => "https",
            Scheme::Poll => "poll",
        })
    }
}

/// Identity of a remote peer: a base URI and the thumbprint it is expected to present. Equality
/// and hashing are by base URI alone, per the data model — two `Endpoint`s naming the same URI
/// with different expected thumbprints are treated as the same addressing key by the route table
/// and connection pool (whichever was registered first wins, as with any other first-writer-wins
/// map in this runtime).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    base_uri: String,
    scheme: Scheme,
    thumbprint: Option<Thumbprint>,
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.base_uri == other.base_uri
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.base_uri.hash(state);
    }
}

impl Endpoint {
    pub fn https(base_uri: impl Into<String>, thumbprint: Thumbprint) -> Endpoint {
        Endpoint {
            base_uri: normalize(base_uri.into()),
            scheme: Scheme::Https,
            thumbprint: Some(thumbprint),
        }
    }

    pub fn poll(subscription_uri: impl Into<String>) -> Endpoint {
        Endpoint {
            base_uri: normalize(subscription_uri.into()),
            scheme: Scheme::Poll,
            thumbprint: None,
        }
    }

    /// Parses a URI of the form `https://host:port[/]` or `poll://SUBSCRIPTION-ID`.
    pub fn parse(uri: &str, thumbprint: Option<Thumbprint>) -> Result<Endpoint, ProtocolError> {
        if let Some(rest) = uri.strip_prefix("https://") {
            let _ = rest;
            Ok(Endpoint::https(
                uri,
                thumbprint.ok_or_else(|| ProtocolError::MissingThumbprint(uri.to_string()))?,
            ))
        } else if uri.starts_with("poll://") {
            Ok(Endpoint::poll(uri))
        } else {
            Err(ProtocolError::UnknownScheme(uri.to_string()))
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn thumbprint(&self) -> Option<&Thumbprint> {
        self.thumbprint.as_ref()
    }

    /// The host:port part of an `https` endpoint, used for TCP dial and SNI. Panics if called on
    /// a `poll` endpoint — callers dispatch on `scheme()` first.
    pub fn authority(&self) -> &str {
        self.base_uri
            .strip_prefix("https://")
            .expect("authority() called on a non-https endpoint")
            .trim_end_matches('/')
    }
}

fn normalize(mut uri: String) -> String {
    if uri.starts_with("https://") && !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}
