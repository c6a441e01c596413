//! Courier Server: broker clients, producer, consumer loop, dispatch handlers,
//! and the worker runtime around them.

pub mod broker;
pub mod config;
pub mod event;
pub mod network;
pub mod telemetry;

pub use broker::{BrokerConsumer, BrokerError, BrokerProducer, MemoryBroker, Pingable};
pub use config::{BrokerConfig, ConfigError, OffsetReset};
pub use event::{ConsumerLoop, DispatchHandler, EventProducer, PublishError};
pub use network::ShutdownController;
