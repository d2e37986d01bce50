use thiserror::Error;
use wire::ProtocolError;

/// Failures from driving the per-connection exchange loop or a `PendingRequestQueue`. This is the
/// error type `transport` and `runtime` see; they fold it into the single caller-facing
/// `ClientError` together with `TransportError`.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("the polling endpoint did not collect the request within the allowed time")]
    CollectionTimeout,

    #[error("the polling endpoint collected the request but did not respond within the allowed time")]
    ResponseTimeout,

    #[error("the request was cancelled before a response was received")]
    Cancelled,

    #[error("the runtime is shutting down")]
    ShuttingDown,

    #[error("received a response for request {0} that does not match any in-flight request on this connection")]
    UnmatchedResponse(String),
}
