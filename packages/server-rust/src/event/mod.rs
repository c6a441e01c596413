//! Event messaging: header adapter, producer, consumer loop, and dispatch
//! handlers.

pub mod adapter;
pub mod consumer;
pub mod handler;
pub mod producer;

pub use adapter::{headers_from_request, new_request_id, HeaderError};
pub use consumer::{start, ConsumeError, ConsumerLoop, ConsumerStats, LoopState, StartError, POLL_TIMEOUT};
pub use handler::{DispatchHandler, HttpIntrospector, IntrospectHandler, IntrospectionReport, Introspector};
pub use producer::{EventProducer, IntrospectRequestProducer, PublishError};
