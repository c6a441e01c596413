//! Message payloads and the envelopes that carry them to and from the broker.

use serde::{Deserialize, Serialize};

use crate::headers::HeaderSet;

/// Body of an introspection request.
///
/// Mirrors the embedded `introspect_request.message.json` schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectRequestMessage {
    /// Repository identifier; also used as the partition key.
    pub uuid: String,
    /// Repository URL to introspect.
    pub url: String,
}

impl IntrospectRequestMessage {
    /// Builds a request for the given repository.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMessage`] if either field is empty.
    pub fn new(uuid: impl Into<String>, url: impl Into<String>) -> Result<Self, InvalidMessage> {
        let uuid = uuid.into();
        let url = url.into();
        if uuid.is_empty() {
            return Err(InvalidMessage("uuid cannot be empty"));
        }
        if url.is_empty() {
            return Err(InvalidMessage("url cannot be empty"));
        }
        Ok(Self { uuid, url })
    }
}

/// A message payload failed a construction precondition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidMessage(pub &'static str);

/// Outbound message, ready to be handed to a broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Real (broker-side) topic.
    pub topic: String,
    /// Partition key; never empty.
    pub key: String,
    pub headers: HeaderSet,
    /// Serialized body.
    pub payload: Vec<u8>,
}

/// Inbound message as observed by a broker consumer.
///
/// `topic` starts as the real topic name; the consumer loop rewrites it to
/// the logical name before validation and dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: Option<String>,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub headers: HeaderSet,
    pub payload: Option<Vec<u8>>,
    /// Broker timestamp in milliseconds since the Unix epoch, when provided.
    pub timestamp_ms: Option<i64>,
}

impl ConsumedMessage {
    /// Key rendered as UTF-8 (lossy) for logging; empty when absent.
    #[must_use]
    pub fn key_str(&self) -> String {
        self.key
            .as_deref()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default()
    }

    /// Topic for logging; empty when unset.
    #[must_use]
    pub fn topic_str(&self) -> &str {
        self.topic.as_deref().unwrap_or_default()
    }

    /// Decodes the body as JSON into `T`.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error for a missing or undecodable body.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.payload.as_deref().unwrap_or_default())
    }
}

impl From<Envelope> for ConsumedMessage {
    fn from(envelope: Envelope) -> Self {
        Self {
            topic: Some(envelope.topic),
            partition: 0,
            offset: 0,
            key: Some(envelope.key.into_bytes()),
            headers: envelope.headers,
            payload: Some(envelope.payload),
            timestamp_ms: None,
        }
    }
}
