//! Wire-level data model: the envelope types (`RequestMessage`/`ResponseMessage`), the endpoint
//! and thumbprint addressing records, the length-prefixed frame codec, and the identification
//! preamble exchanged once per connection.
//!
//! Nothing in this crate knows about TLS, sockets, or the protocol state machine built on top of
//! it ([`exchange`]) — it is purely the shape of the bytes on the wire and the types callers
//! construct requests and responses out of.

pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod value;

pub use endpoint::{Endpoint, Scheme, Thumbprint};
pub use envelope::{ActivityId, RemoteError, RequestId, RequestMessage, ResponseMessage};
pub use error::ProtocolError;
pub use frame::{Identification, Role};
pub use value::Value;
