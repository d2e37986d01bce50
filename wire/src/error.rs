use thiserror::Error;

use crate::frame::Role;

/// Failures that originate at the wire/framing layer: a bad identification preamble, an
/// oversized or undecodable envelope frame, or a role the protocol state machine did not expect.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("identification frame did not match the expected `MX-CLIENT`/`MX-SUBSCRIBER` pattern: {0:?}")]
    BadIdentification(String),

    #[error("frame of {size} bytes exceeds the maximum frame size of {max} bytes")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("malformed envelope")]
    MalformedEnvelope(#[from] Box<bincode::ErrorKind>),

    #[error("expected peer in role {expected:?}, got {got:?}")]
    RoleMismatch { expected: Role, got: Role },

    #[error("connection closed before a complete frame was read")]
    UnexpectedEof,

    #[error("'{0}' is not a valid thumbprint (expected 64 hex characters)")]
    BadThumbprint(String),

    #[error("endpoint '{0}' has no scheme recognized by this runtime (expected `https://` or `poll://`)")]
    UnknownScheme(String),

    #[error("endpoint '{0}' is an https endpoint but no expected thumbprint was supplied")]
    MissingThumbprint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
