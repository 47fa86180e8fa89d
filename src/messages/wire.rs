use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

/// Wire key carrying the message identifier
pub const ID_KEY: &str = "id";
/// Wire key carrying the route of a write-side message
pub const ROUTE_KEY: &str = "method";
/// Accepted alternative spelling of [`ROUTE_KEY`]
pub const ROUTE_ALIAS: &str = "route";
/// Wire key carrying the error record of a read-side message
pub const ERROR_KEY: &str = "error";
/// Accepted alternative spelling of [`ERROR_KEY`]
pub const ERROR_ALIAS: &str = "status";
/// Wire key carrying the echoed outbound payload on a read-side message
pub const REQUEST_KEY: &str = "request";

/// Errors raised while encoding or decoding envelopes
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid route: expected {expected:?}, found {found:?}")]
    InvalidRoute { expected: String, found: String },

    #[error("Frame matched none of {shapes} registered shapes")]
    Unmatched { shapes: usize },
}

impl CodecError {
    /// True when the frame parsed but failed a shape's structural self-check
    pub fn is_invalid_route(&self) -> bool {
        matches!(self, CodecError::InvalidRoute { .. })
    }
}

/// Serialize a payload and require that it produced a JSON object
pub fn payload_to_object<P: Serialize>(payload: &P) -> Result<Map<String, Value>, CodecError> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(CodecError::NotAnObject),
    }
}

/// Parse a raw frame into a JSON object
pub fn parse_object(frame: &[u8]) -> Result<Map<String, Value>, CodecError> {
    trace!(frame_size = frame.len(), "Parsing frame");
    match serde_json::from_slice::<Value>(frame)? {
        Value::Object(map) => Ok(map),
        _ => Err(CodecError::NotAnObject),
    }
}

/// Remove a field from an object, accepting an alias
pub fn take_field(map: &mut Map<String, Value>, key: &str, alias: &str) -> Option<Value> {
    map.remove(key).or_else(|| map.remove(alias))
}

/// Remove and interpret the identifier field
pub fn take_id(map: &mut Map<String, Value>) -> Result<i64, CodecError> {
    let value = map.remove(ID_KEY).ok_or(CodecError::MissingField(ID_KEY))?;
    value.as_i64().ok_or_else(|| CodecError::InvalidField {
        field: ID_KEY,
        reason: format!("expected an integer, found {}", value),
    })
}

/// Serialize an object map into frame bytes
pub fn encode_object(map: Map<String, Value>) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&Value::Object(map))?)
}
