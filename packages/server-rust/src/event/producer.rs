//! Publishes header-tagged JSON messages through a broker client.

use std::sync::Arc;

use courier_core::headers::HDR_TYPE;
use courier_core::topics::TOPIC_INTROSPECT;
use courier_core::{Envelope, EventType, HeaderSet, IntrospectRequestMessage, SchemaError, SchemaRegistry, TopicTranslation};
use http::HeaderMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::adapter::{headers_from_request, HeaderError};
use crate::broker::{BrokerError, BrokerProducer};

/// Reasons a message was not handed to the broker client.
///
/// The precondition variants have stable messages; callers match on them.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("producer is not initialized")]
    ProducerUnavailable,
    #[error("topic cannot be an empty string")]
    EmptyTopic,
    #[error("key cannot be an empty string")]
    EmptyKey,
    #[error("value cannot be null")]
    MissingValue,
    #[error("topic translation failed for topic: {topic}")]
    TopicTranslationFailed { topic: String },
    #[error("failed to serialize message value: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("outbound message rejected: {0}")]
    Validation(#[from] SchemaError),
    #[error("error adapting request headers: {0}")]
    Headers(#[from] HeaderError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Serializes values as JSON and publishes them to the real topic.
///
/// Cheap to share behind an `Arc`; concurrent `publish` calls go straight to
/// the broker client.
pub struct EventProducer {
    client: Option<Arc<dyn BrokerProducer>>,
    translation: Arc<TopicTranslation>,
    schemas: Option<Arc<SchemaRegistry>>,
}

impl EventProducer {
    /// `client` may be `None` when the broker is disabled; every publish then
    /// fails with [`PublishError::ProducerUnavailable`].
    #[must_use]
    pub fn new(client: Option<Arc<dyn BrokerProducer>>, translation: Arc<TopicTranslation>) -> Self {
        Self {
            client,
            translation,
            schemas: None,
        }
    }

    /// Validates every outbound body against the registry before sending.
    #[must_use]
    pub fn with_schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Publishes `value` as JSON under the logical `topic`.
    ///
    /// `Ok` means the broker client accepted the message for sending, not that
    /// the broker has stored it.
    ///
    /// # Errors
    ///
    /// Checked in order: missing client, empty topic, empty key, missing value,
    /// failed translation, serialization, a missing or unknown `Type` header,
    /// optional schema validation, and finally the broker client's own error.
    pub async fn publish<T>(
        &self,
        topic: &str,
        key: &str,
        value: Option<&T>,
        headers: HeaderSet,
    ) -> Result<(), PublishError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let result = self.try_publish(topic, key, value, headers).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("courier_producer_messages_total", "result" => outcome).increment(1);
        result
    }

    async fn try_publish<T>(
        &self,
        topic: &str,
        key: &str,
        value: Option<&T>,
        headers: HeaderSet,
    ) -> Result<(), PublishError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let client = self.client.as_ref().ok_or(PublishError::ProducerUnavailable)?;
        if topic.is_empty() {
            return Err(PublishError::EmptyTopic);
        }
        // The key drives partition assignment.
        if key.is_empty() {
            return Err(PublishError::EmptyKey);
        }
        let value = value.ok_or(PublishError::MissingValue)?;

        let real_topic = self.translation.get_real(topic);
        if real_topic.is_empty() {
            return Err(PublishError::TopicTranslationFailed {
                topic: topic.to_string(),
            });
        }
        info!(requested_topic = %topic, topic = %real_topic, "topic mapping");

        let payload = serde_json::to_vec(value).map_err(PublishError::Serialize)?;

        let type_key = headers.get_str(HDR_TYPE).ok_or(SchemaError::MissingEventType)?;
        let event = type_key.parse::<EventType>().map_err(SchemaError::from)?;
        if let Some(schemas) = &self.schemas {
            schemas.validate(topic, event.as_str(), &payload)?;
        }

        let envelope = Envelope {
            topic: real_topic.to_string(),
            key: key.to_string(),
            headers,
            payload,
        };
        debug!(topic = %envelope.topic, key = %envelope.key, headers = %envelope.headers, "producing message");
        client.send(envelope).await.map_err(|err| {
            warn!(topic = %real_topic, key = %key, error = %err, "broker client rejected message");
            PublishError::from(err)
        })
    }
}

/// Publishes introspection requests for the API layer.
pub struct IntrospectRequestProducer {
    producer: Arc<EventProducer>,
}

impl IntrospectRequestProducer {
    #[must_use]
    pub fn new(producer: Arc<EventProducer>) -> Self {
        Self { producer }
    }

    /// Publishes `message` keyed by its repository uuid, with headers built
    /// from the inbound request.
    ///
    /// # Errors
    ///
    /// [`PublishError::Headers`] when the request has no identity, otherwise
    /// any [`EventProducer::publish`] error.
    pub async fn produce(
        &self,
        inbound: &HeaderMap,
        message: &IntrospectRequestMessage,
    ) -> Result<(), PublishError> {
        let headers = headers_from_request(inbound, EventType::Introspect)?;
        self.producer
            .publish(TOPIC_INTROSPECT, &message.uuid, Some(message), headers)
            .await
    }
}
