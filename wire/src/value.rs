use serde::{Deserialize, Serialize};

/// A single positional argument or return value. `RequestMessage`/`ResponseMessage` carry these
/// instead of one generated type per RPC method, standing in for the reflection-based marshaling
/// the full runtime this core sits inside performs with an opaque `ServiceInvoker`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Escape hatch for a caller that already has a serialized payload (e.g. a nested
    /// `RequestMessage` wrapped for routing) and does not want it re-encoded through `Value`.
    Encoded(Vec<u8>),
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

/// Raised when a proxy call's return `Value` is not the shape the typed client expected it to
/// be — a mismatch between the wire value and the interface's declared return type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("expected a {expected} return value, got {got:?}")]
pub struct ValueShapeError {
    expected: &'static str,
    got: Value,
}

impl TryFrom<Value> for String {
    type Error = ValueShapeError;
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(ValueShapeError { expected: "string", got: other }),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = ValueShapeError;
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::I64(v) => Ok(v),
            other => Err(ValueShapeError { expected: "i64", got: other }),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = ValueShapeError;
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(ValueShapeError { expected: "bool", got: other }),
        }
    }
}

impl TryFrom<Value> for () {
    type Error = ValueShapeError;
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Unit => Ok(()),
            other => Err(ValueShapeError { expected: "unit", got: other }),
        }
    }
}
