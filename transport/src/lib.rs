//! TLS transport: dialing, accepting, pooling, and the polling-client supervisory loop built on
//! top of [`exchange`]'s protocol state machine. Trust is thumbprint-based rather than PKI — see
//! [`tls`] for the accept-structurally / verify-after-handshake split.

pub mod client;
pub mod discover;
pub mod error;
pub mod listener;
pub mod pool;
pub mod polling;
pub mod tls;

pub use client::SecureClient;
pub use discover::discover;
pub use error::TransportError;
pub use listener::{ListenerHandle, SecureListener, TrustPredicate};
pub use pool::{ClientProtocol, ConnectionPool, PoolConfig};
pub use polling::{PollingClient, PollingConfig};
pub use tls::Identity;
