//! The message exchange subsystem: the per-connection protocol state machine
//! ([`protocol::MessageExchangeProtocol`]) and the polling queue that couples outbound-initiated
//! transports to inbound-style request dispatch ([`queue::PendingRequestQueue`]).
//!
//! A connection identifies itself exactly once, then carries an ordered sequence of envelopes.
//! Role inversion — the detail that lets a firewalled host dial out yet still serve requests — is
//! realized by selecting the loop body on what the peer (or, for the dialing subscriber, the
//! local side itself) identified as, never on who physically dialed.

pub mod error;
pub mod protocol;
pub mod queue;

pub use error::ExchangeError;
pub use protocol::{ExchangeState, MessageExchangeProtocol, RequestHandler};
pub use queue::{PendingRequest, PendingRequestQueue, QueueMap};
