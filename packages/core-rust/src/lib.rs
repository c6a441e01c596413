//! Courier Core: topic translation, message headers, envelopes, and the schema registry.

pub mod headers;
pub mod message;
pub mod schema;
pub mod topics;

pub use headers::{EventType, Header, HeaderSet, UnknownEventType};
pub use message::{ConsumedMessage, Envelope, IntrospectRequestMessage, InvalidMessage};
pub use schema::{Schema, SchemaError, SchemaLoadError, SchemaRegistry, Violation};
pub use topics::{MappingSourceError, TopicTranslation};
