pub mod codec;
pub mod message;
pub mod transport;

pub use message::{Field, MessageBuilder, StructuredMessage, Value};
pub use transport::{
    Connection, Connector, EndpointDescriptor, RequestChannel, ServerSocketProcess,
    TransportConfig, TransportError,
};
