pub mod envelope;
pub mod registry;
pub mod wire;

pub use envelope::{
    generate_id, Empty, Envelope, ErrorStatus, InboundMessage, MessageId, Request, Response,
    RETRIES_EXHAUSTED_CODE, RETRIES_EXHAUSTED_MESSAGE,
};
pub use registry::TypeRegistry;
pub use wire::CodecError;
