//! Broker client capabilities consumed by the producer and the consumer loop.
//!
//! Transport, partition assignment, and offset persistence live behind these
//! traits. Implementations:
//!
//! - [`MemoryBroker`]: in-process broker for tests and local development
//! - `KafkaProducer` / `KafkaConsumer` (feature `kafka`): `rdkafka` adapters

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

use std::time::Duration;

use async_trait::async_trait;
use courier_core::{ConsumedMessage, Envelope};

use crate::config::ConfigError;

pub use memory::{MemoryBroker, MemoryConsumer};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaProducer};

/// Errors reported by a broker client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The client was handed settings it cannot run with.
    #[error("invalid broker configuration: {0}")]
    Config(#[from] ConfigError),
    /// The client could not be created or cannot reach the broker.
    #[error("broker connection error: {0}")]
    Connection(String),
    /// Subscribing to the topic list failed.
    #[error("subscription failed: {0}")]
    Subscribe(String),
    /// The message was not accepted for sending (e.g. local queue full).
    #[error("message not accepted for sending: {0}")]
    Send(String),
    /// A poll failed for a reason other than a timeout.
    #[error("error awaiting to read a message: {0}")]
    Poll(String),
    /// A metadata request did not complete in time.
    #[error("broker did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Publishing side of a broker client. Must be safe for concurrent use;
/// callers add no locking of their own.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Hands the envelope to the client for delivery.
    ///
    /// `Ok` means accepted for sending, not acknowledged by the broker.
    async fn send(&self, envelope: Envelope) -> Result<(), BrokerError>;
}

/// Consuming side of a broker client. Owned by a single consumer loop.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Joins the consumer group for the given real topic names.
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Waits up to `timeout` for the next message. `Ok(None)` is a timeout.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, BrokerError>;
}

/// Reachability check, used by readiness reporting and at startup.
#[async_trait]
pub trait Pingable: Send + Sync {
    async fn ping(&self, timeout: Duration) -> Result<(), BrokerError>;
}

/// Pings every instance in order, failing on the first unreachable one.
///
/// # Errors
///
/// Returns the first [`BrokerError`] encountered.
pub async fn ping(timeout: Duration, instances: &[&dyn Pingable]) -> Result<(), BrokerError> {
    for instance in instances {
        instance.ping(timeout).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl Pingable for Unreachable {
        async fn ping(&self, timeout: Duration) -> Result<(), BrokerError> {
            Err(BrokerError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }

    #[tokio::test]
    async fn ping_succeeds_for_reachable_instances() {
        let broker = MemoryBroker::new();
        ping(Duration::from_millis(100), &[&broker, &broker]).await.unwrap();
    }

    #[tokio::test]
    async fn ping_reports_first_failure() {
        let broker = MemoryBroker::new();
        let err = ping(Duration::from_millis(100), &[&broker, &Unreachable])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "broker did not answer within 100ms");
    }
}
