use crate::messages::wire::{
    encode_object, parse_object, payload_to_object, take_field, take_id, CodecError, ERROR_ALIAS,
    ERROR_KEY, ID_KEY, REQUEST_KEY, ROUTE_ALIAS, ROUTE_KEY,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Correlation key shared by a request and its reply
pub type MessageId = i64;

/// Error code reserved for "retries exhausted, no response ever received"
pub const RETRIES_EXHAUSTED_CODE: i32 = 666;
/// Message attached to [`RETRIES_EXHAUSTED_CODE`]
pub const RETRIES_EXHAUSTED_MESSAGE: &str = "no response received after retrying";

/// Draw a fresh non-negative message id
pub fn generate_id() -> MessageId {
    MessageId::from(rand::random::<u32>())
}

/// Error sub-record embedded in every read-side message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatus {
    pub error_code: i32,
    #[serde(default)]
    pub error_message: String,
}

impl ErrorStatus {
    /// Status carried by a successful reply
    pub fn ok() -> Self {
        Self {
            error_code: 0,
            error_message: String::new(),
        }
    }

    pub fn new(error_code: i32, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            error_message: error_message.into(),
        }
    }

    /// The sentinel delivered when a request never got an answer
    pub fn retries_exhausted() -> Self {
        Self::new(RETRIES_EXHAUSTED_CODE, RETRIES_EXHAUSTED_MESSAGE)
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }

    pub fn is_retries_exhausted(&self) -> bool {
        self.error_code == RETRIES_EXHAUSTED_CODE
    }
}

impl Default for ErrorStatus {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.error_code, self.error_message)
    }
}

/// Outbound side of the envelope contract, type-erased so the pending table
/// can hold any request for resending.
pub trait Envelope: fmt::Debug + Send + Sync + 'static {
    fn id(&self) -> MessageId;

    /// Logical operation name, present on write-side messages
    fn route(&self) -> Option<&str>;

    /// Whether a correlated reply must be tracked
    fn awaits_answer(&self) -> bool;

    fn encode(&self) -> Result<Vec<u8>, CodecError>;
}

/// Inbound side of the envelope contract, implemented by every type a
/// registry can decode into.
pub trait InboundMessage: fmt::Debug + Send + 'static {
    fn id(&self) -> MessageId;

    fn route(&self) -> Option<&str> {
        None
    }

    /// Embedded error record, for read-side messages
    fn error(&self) -> Option<&ErrorStatus> {
        None
    }

    /// True when the message carries a non-zero error code
    fn is_failure(&self) -> bool {
        self.error().map(|status| !status.is_success()).unwrap_or(false)
    }
}

/// Write-side envelope: a route plus the payload fields of the concrete message
#[derive(Debug, Clone)]
pub struct Request<P> {
    pub id: MessageId,
    pub route: String,
    pub awaits_answer: bool,
    pub payload: P,
}

impl<P> Request<P> {
    /// Create a request with a generated id that awaits an answer
    pub fn new(route: impl Into<String>, payload: P) -> Self {
        Self::with_id(generate_id(), route, payload)
    }

    pub fn with_id(id: MessageId, route: impl Into<String>, payload: P) -> Self {
        Self {
            id,
            route: route.into(),
            awaits_answer: true,
            payload,
        }
    }

    /// Mark the request as fire-and-forget
    pub fn without_answer(mut self) -> Self {
        self.awaits_answer = false;
        self
    }
}

impl<P: DeserializeOwned> Request<P> {
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let mut map = parse_object(frame)?;
        let id = take_id(&mut map)?;
        let route = match take_field(&mut map, ROUTE_KEY, ROUTE_ALIAS) {
            Some(Value::String(route)) => route,
            Some(other) => {
                return Err(CodecError::InvalidField {
                    field: ROUTE_KEY,
                    reason: format!("expected a string, found {}", other),
                })
            }
            None => return Err(CodecError::MissingField(ROUTE_KEY)),
        };
        let payload = serde_json::from_value(Value::Object(map))?;
        Ok(Self {
            id,
            route,
            awaits_answer: true,
            payload,
        })
    }

    /// Decode and require the route to equal `expected`
    pub fn decode_expecting(frame: &[u8], expected: &str) -> Result<Self, CodecError> {
        let request = Self::decode(frame)?;
        if request.route != expected {
            return Err(CodecError::InvalidRoute {
                expected: expected.to_string(),
                found: request.route,
            });
        }
        Ok(request)
    }
}

impl<P: Serialize> Request<P> {
    pub fn to_object(&self) -> Result<Map<String, Value>, CodecError> {
        let mut map = payload_to_object(&self.payload)?;
        map.insert(ID_KEY.to_string(), Value::from(self.id));
        map.insert(ROUTE_KEY.to_string(), Value::from(self.route.clone()));
        Ok(map)
    }
}

impl<P> PartialEq for Request<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for Request<P> {}

impl<P> Hash for Request<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<P> Envelope for Request<P>
where
    P: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn id(&self) -> MessageId {
        self.id
    }

    fn route(&self) -> Option<&str> {
        Some(&self.route)
    }

    fn awaits_answer(&self) -> bool {
        self.awaits_answer
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_object(self.to_object()?)
    }
}

impl<P: fmt::Debug + Send + 'static> InboundMessage for Request<P> {
    fn id(&self) -> MessageId {
        self.id
    }

    fn route(&self) -> Option<&str> {
        Some(&self.route)
    }
}

/// Read-side envelope. A reply with a non-zero error code may omit its payload.
#[derive(Debug, Clone)]
pub struct Response<P> {
    pub id: MessageId,
    pub route: Option<String>,
    pub error: ErrorStatus,
    /// Outbound payload echoed back by the peer, when it sent one
    pub request: Option<Value>,
    pub payload: Option<P>,
}

impl<P> Response<P> {
    pub fn success(id: MessageId, payload: P) -> Self {
        Self {
            id,
            route: None,
            error: ErrorStatus::ok(),
            request: None,
            payload: Some(payload),
        }
    }

    pub fn failure(id: MessageId, error: ErrorStatus) -> Self {
        Self {
            id,
            route: None,
            error,
            request: None,
            payload: None,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }
}

impl Response<Value> {
    /// Reply synthesized locally when `original` ran out of retries
    pub fn retries_exhausted(original: &dyn Envelope) -> Self {
        // The echoed request is diagnostic only; drop it if it no longer encodes.
        let request = original
            .encode()
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());
        Self {
            id: original.id(),
            route: original.route().map(str::to_string),
            error: ErrorStatus::retries_exhausted(),
            request,
            payload: None,
        }
    }
}

impl<P: DeserializeOwned> Response<P> {
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let mut map = parse_object(frame)?;
        let id = take_id(&mut map)?;
        let error = match take_field(&mut map, ERROR_KEY, ERROR_ALIAS) {
            Some(value) => serde_json::from_value::<ErrorStatus>(value)?,
            None => ErrorStatus::ok(),
        };
        let route = match take_field(&mut map, ROUTE_KEY, ROUTE_ALIAS) {
            Some(Value::String(route)) => Some(route),
            _ => None,
        };
        let request = map.remove(REQUEST_KEY);
        let payload = if error.is_success() {
            Some(serde_json::from_value(Value::Object(map))?)
        } else {
            serde_json::from_value(Value::Object(map)).ok()
        };
        Ok(Self {
            id,
            route,
            error,
            request,
            payload,
        })
    }
}

impl<P: Serialize> Response<P> {
    pub fn to_object(&self) -> Result<Map<String, Value>, CodecError> {
        let mut map = match &self.payload {
            Some(payload) => payload_to_object(payload)?,
            None => Map::new(),
        };
        map.insert(ID_KEY.to_string(), Value::from(self.id));
        map.insert(ERROR_KEY.to_string(), serde_json::to_value(&self.error)?);
        if let Some(route) = &self.route {
            map.insert(ROUTE_KEY.to_string(), Value::from(route.clone()));
        }
        if let Some(request) = &self.request {
            map.insert(REQUEST_KEY.to_string(), request.clone());
        }
        Ok(map)
    }
}

impl<P> PartialEq for Response<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for Response<P> {}

impl<P> Hash for Response<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<P> Envelope for Response<P>
where
    P: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn id(&self) -> MessageId {
        self.id
    }

    fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    fn awaits_answer(&self) -> bool {
        false
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_object(self.to_object()?)
    }
}

impl<P: fmt::Debug + Send + 'static> InboundMessage for Response<P> {
    fn id(&self) -> MessageId {
        self.id
    }

    fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    fn error(&self) -> Option<&ErrorStatus> {
        Some(&self.error)
    }
}

/// Payload for messages that carry nothing beyond the envelope fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}
