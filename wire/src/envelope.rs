use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::endpoint::Endpoint;
use crate::error::ProtocolError;
use crate::value::Value;

/// Random 128-bit identifier. Used both as the tracing `ActivityId` (propagated across hops
/// unchanged) and the per-call `RequestId` (fresh on every `RequestMessage`, used for
/// idempotency/correlation — notably to pair a `PendingRequest` with the response that completes
/// it in [`exchange::queue`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(u128);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(u128);

macro_rules! random_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new() -> Self {
                let mut bytes = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut bytes);
                $ty(u128::from_le_bytes(bytes))
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:032x}", self.0)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self)
            }
        }
    };
}

random_id!(ActivityId);
random_id!(RequestId);

const ROUTER_SERVICE: &str = "Router";
const ROUTER_METHOD: &str = "Route";

/// An outbound (or, once received, inbound) RPC call. Immutable after construction: every field
/// is set at `new()` time, and wrapping for routing produces a new envelope rather than mutating
/// this one in place.
#[derive(Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    activity_id: ActivityId,
    request_id: RequestId,
    destination: Endpoint,
    service_name: String,
    method_name: String,
    params: Vec<Value>,
}

impl RequestMessage {
    pub fn new(
        activity_id: ActivityId,
        destination: Endpoint,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        params: Vec<Value>,
    ) -> RequestMessage {
        RequestMessage {
            activity_id,
            request_id: RequestId::new(),
            destination,
            service_name: service_name.into(),
            method_name: method_name.into(),
            params,
        }
    }

    pub fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn is_router_call(&self) -> bool {
        self.service_name == ROUTER_SERVICE && self.method_name == ROUTER_METHOD
    }

    /// Wraps `self` as the single argument of a synthetic `Router.Route` call destined for `via`.
    /// Used by the runtime dispatcher when an outgoing request's destination matches a route
    /// table entry.
    pub fn wrap_for_routing(self, via: Endpoint) -> Result<RequestMessage, ProtocolError> {
        let activity_id = self.activity_id;
        let encoded = bincode::serialize(&self)?;
        Ok(RequestMessage::new(
            activity_id,
            via,
            ROUTER_SERVICE,
            ROUTER_METHOD,
            vec![Value::Encoded(encoded)],
        ))
    }

    /// Unwraps a `Router.Route` call's single argument back into the original `RequestMessage`.
    /// Panics if `self` is not a router call — callers check `is_router_call()` first.
    pub fn unwrap_routed(&self) -> Result<RequestMessage, ProtocolError> {
        debug_assert!(self.is_router_call(), "unwrap_routed on a non-router call");
        match self.params.first() {
            Some(Value::Encoded(bytes)) => Ok(bincode::deserialize(bytes)?),
            _ => Err(ProtocolError::BadIdentification(
                "Router.Route call missing its wrapped argument".to_string(),
            )),
        }
    }
}

/// The structured payload of a failed `ResponseMessage`: the handler's message plus a rendering
/// of the call site it failed at (`ServiceName.MethodName`, optionally followed by frames the
/// handler contributed), the way a caller would expect a remote stack trace to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    pub remote_call_site: String,
    pub frames: Vec<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>, remote_call_site: impl Into<String>) -> RemoteError {
        RemoteError {
            message: message.into(),
            remote_call_site: remote_call_site.into(),
            frames: Vec::new(),
        }
    }

    pub fn with_frames(mut self, frames: Vec<String>) -> RemoteError {
        self.frames = frames;
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        write!(f, "\n   at {}", self.remote_call_site)?;
        for frame in &self.frames {
            write!(f, "\n   at {frame}")?;
        }
        Ok(())
    }
}

/// The reply to a `RequestMessage`, correlated by `request_id`. Exactly one of `result`/`error`
/// is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    request_id: RequestId,
    outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Outcome {
    Result(Value),
    Error(RemoteError),
}

impl ResponseMessage {
    pub fn success(request_id: RequestId, value: Value) -> ResponseMessage {
        ResponseMessage {
            request_id,
            outcome: Outcome::Result(value),
        }
    }

    pub fn failure(request_id: RequestId, error: RemoteError) -> ResponseMessage {
        ResponseMessage {
            request_id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Rebinds this response to a different request id, carrying the same outcome. Used when a
    /// response to an unwrapped, routed request must be written back under the wire request id of
    /// the synthetic `Router.Route` call that carried it.
    pub fn retargeted(self, request_id: RequestId) -> ResponseMessage {
        ResponseMessage { request_id, ..self }
    }

    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => Err(error),
        }
    }

    pub fn as_result(&self) -> Result<&Value, &RemoteError> {
        match &self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => Err(error),
        }
    }
}
