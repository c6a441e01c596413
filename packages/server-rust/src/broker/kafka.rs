//! Kafka broker clients built on `rdkafka`.
//!
//! Native property maps come from [`BrokerConfig`]; nothing else in the crate
//! knows librdkafka key names.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{ConsumedMessage, Envelope, Header, HeaderSet};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
use tracing::{debug, info};

use super::{BrokerConsumer, BrokerError, BrokerProducer, Pingable};
use crate::config::BrokerConfig;

fn client_config<'a>(props: impl IntoIterator<Item = (&'a str, String)>) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in props {
        config.set(key, value);
    }
    config
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Fire-and-forget producer. Delivery reports are handled on the client's
/// background thread; `send` only enqueues.
pub struct KafkaProducer {
    producer: Arc<ThreadedProducer<DefaultProducerContext>>,
}

impl KafkaProducer {
    /// Creates the producer.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Config`] for settings that fail validation,
    /// [`BrokerError::Connection`] when the client cannot be created.
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        config.validate_for_producer()?;
        let producer: ThreadedProducer<DefaultProducerContext> =
            client_config(config.producer_properties())
                .create()
                .map_err(|err| BrokerError::Connection(err.to_string()))?;
        info!(bootstrap_servers = %config.bootstrap_servers, "kafka producer created");
        Ok(Self {
            producer: Arc::new(producer),
        })
    }

    /// Waits for queued messages to be delivered.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Send`] if messages remain queued after `timeout`.
    pub fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.producer
            .flush(timeout)
            .map_err(|err| BrokerError::Send(err.to_string()))
    }
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    async fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let headers = envelope
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, header| {
                headers.insert(rdkafka::message::Header {
                    key: &header.key,
                    value: Some(&header.value),
                })
            });

        let record = BaseRecord::to(&envelope.topic)
            .key(&envelope.key)
            .payload(&envelope.payload)
            .headers(headers);

        self.producer
            .send(record)
            .map_err(|(err, _record)| BrokerError::Send(err.to_string()))?;
        debug!(topic = %envelope.topic, key = %envelope.key, "message enqueued");
        Ok(())
    }
}

#[async_trait]
impl Pingable for KafkaProducer {
    async fn ping(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = Arc::clone(&self.producer);
        fetch_metadata(move || producer.client().fetch_metadata(None, timeout).map(|_| ()), timeout).await
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Consumer-group member with auto-commit at the configured interval.
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

impl KafkaConsumer {
    /// Creates the consumer. Subscription happens separately.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Config`] for settings that fail validation,
    /// [`BrokerError::Connection`] when the client cannot be created.
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        config.validate_for_consumer()?;
        let consumer: StreamConsumer = client_config(config.consumer_properties())
            .create()
            .map_err(|err| BrokerError::Connection(err.to_string()))?;
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group_id = %config.group_id,
            "kafka consumer created"
        );
        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|err| BrokerError::Subscribe(err.to_string()))?;
        info!(topics = %topics.join(","), "consumer subscribed to topics");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(err)) => Err(BrokerError::Poll(err.to_string())),
            Ok(Ok(message)) => {
                let headers: HeaderSet = message
                    .headers()
                    .map(|headers| {
                        headers
                            .iter()
                            .map(|header| Header::new(header.key, header.value.unwrap_or_default()))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Some(ConsumedMessage {
                    topic: Some(message.topic().to_string()),
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message.key().map(<[u8]>::to_vec),
                    headers,
                    payload: message.payload().map(<[u8]>::to_vec),
                    timestamp_ms: message.timestamp().to_millis(),
                }))
            }
        }
    }
}

#[async_trait]
impl Pingable for KafkaConsumer {
    async fn ping(&self, timeout: Duration) -> Result<(), BrokerError> {
        let consumer = Arc::clone(&self.consumer);
        fetch_metadata(move || consumer.fetch_metadata(None, timeout).map(|_| ()), timeout).await
    }
}

/// Runs a blocking metadata request off the async workers.
async fn fetch_metadata<F>(request: F, timeout: Duration) -> Result<(), BrokerError>
where
    F: FnOnce() -> rdkafka::error::KafkaResult<()> + Send + 'static,
{
    match tokio::task::spawn_blocking(request).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(rdkafka::error::KafkaError::MetadataFetch(rdkafka::types::RDKafkaErrorCode::OperationTimedOut))) => {
            Err(BrokerError::Timeout {
                timeout_ms: timeout_ms(timeout),
            })
        }
        Ok(Err(err)) => Err(BrokerError::Connection(err.to_string())),
        Err(join_err) => Err(BrokerError::Connection(join_err.to_string())),
    }
}
