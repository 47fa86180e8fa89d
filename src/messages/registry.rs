use crate::messages::envelope::{InboundMessage, Request, Response};
use crate::messages::wire::CodecError;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::{debug, trace};

type DecodeFn<M> = Box<dyn Fn(&[u8]) -> Result<M, CodecError> + Send + Sync>;

/// One decodable message shape
struct Shape<M> {
    name: &'static str,
    decode: DecodeFn<M>,
}

/// Ordered set of message shapes used to classify inbound frames.
///
/// Classification tries each shape in registration order and the first one
/// that decodes wins. Shapes whose schemas overlap must be registered
/// most-specific-first.
pub struct TypeRegistry<M> {
    shapes: Vec<Shape<M>>,
}

impl<M: InboundMessage> TypeRegistry<M> {
    pub fn new() -> Self {
        Self { shapes: Vec::new() }
    }

    /// Register a shape with an arbitrary decode function
    pub fn register<F>(mut self, name: &'static str, decode: F) -> Self
    where
        F: Fn(&[u8]) -> Result<M, CodecError> + Send + Sync + 'static,
    {
        self.shapes.push(Shape {
            name,
            decode: Box::new(decode),
        });
        self
    }

    /// Register a read-side shape decoding into `Response<P>`
    pub fn register_response<P, W>(self, name: &'static str, wrap: W) -> Self
    where
        P: DeserializeOwned,
        W: Fn(Response<P>) -> M + Send + Sync + 'static,
    {
        self.register(name, move |frame| Response::<P>::decode(frame).map(&wrap))
    }

    /// Register a write-side shape whose route must equal `expected_route`
    pub fn register_request<P, W>(
        self,
        name: &'static str,
        expected_route: &'static str,
        wrap: W,
    ) -> Self
    where
        P: DeserializeOwned,
        W: Fn(Request<P>) -> M + Send + Sync + 'static,
    {
        self.register(name, move |frame| {
            Request::<P>::decode_expecting(frame, expected_route).map(&wrap)
        })
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Shape names in classification order
    pub fn names(&self) -> Vec<&'static str> {
        self.shapes.iter().map(|shape| shape.name).collect()
    }

    /// Decode `frame` against the first matching shape.
    ///
    /// When nothing matches, a route mismatch reported by any shape takes
    /// precedence over the generic [`CodecError::Unmatched`].
    pub fn classify(&self, frame: &[u8]) -> Result<(&'static str, M), CodecError> {
        let mut invalid_route = None;

        for shape in &self.shapes {
            match (shape.decode)(frame) {
                Ok(message) => {
                    trace!(shape = shape.name, "Frame classified");
                    return Ok((shape.name, message));
                }
                Err(e) => {
                    trace!(shape = shape.name, error = %e, "Shape rejected frame");
                    if e.is_invalid_route() && invalid_route.is_none() {
                        debug!(shape = shape.name, error = %e, "Route mismatch while classifying");
                        invalid_route = Some(e);
                    }
                }
            }
        }

        Err(invalid_route.unwrap_or(CodecError::Unmatched {
            shapes: self.shapes.len(),
        }))
    }
}

impl<M: InboundMessage> Default for TypeRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for TypeRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.shapes.iter().map(|shape| shape.name))
            .finish()
    }
}
