//! Schema registry: one JSON Schema per `(topic, event type)`, embedded at
//! build time and compiled once at startup.
//!
//! Raw-bytes validation and value validation share one path: bytes are parsed
//! into a `serde_json::Value` and checked by the same compiled validator, so
//! neither entry point is weaker than the other.
//!
//! Every violation found in a body is reported in a single [`SchemaError`];
//! partial results are never dropped.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::headers::{EventType, UnknownEventType, HDR_TYPE};
use crate::message::ConsumedMessage;
use crate::topics::TOPIC_INTROSPECT;

/// JSON Schema for [`IntrospectRequestMessage`](crate::message::IntrospectRequestMessage).
pub const INTROSPECT_REQUEST_SCHEMA: &str =
    include_str!("../schemas/introspect_request.message.json");

/// Schema documents compiled into the binary, keyed by logical topic and event type.
const EMBEDDED_SCHEMAS: &[(&str, EventType, &str)] = &[(
    TOPIC_INTROSPECT,
    EventType::Introspect,
    INTROSPECT_REQUEST_SCHEMA,
)];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A schema document could not be loaded. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    #[error("error unmarshalling for topic '{topic}' schema '{key}': {source}")]
    Malformed {
        topic: String,
        key: EventType,
        #[source]
        source: serde_json::Error,
    },
    #[error("error compiling for topic '{topic}' schema '{key}': {message}")]
    Invalid {
        topic: String,
        key: EventType,
        message: String,
    },
}

/// A single field-level violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Human-readable description of the failed constraint.
    pub message: String,
    /// JSON pointer to the offending location (`(root)` for the document itself).
    pub property_path: String,
    /// The offending value, rendered as JSON.
    pub invalid_value: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} = {}",
            self.message, self.property_path, self.invalid_value
        )
    }
}

/// Validation failure for a message body.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("topic '{topic}' not found in schema mapping")]
    SchemaNotFound { topic: String },
    #[error("schema '{event}' not found for topic '{topic}'")]
    EventSchemaNotFound { topic: String, event: EventType },
    #[error("header 'Type' not found")]
    MissingEventType,
    #[error(transparent)]
    UnknownEventType(#[from] UnknownEventType),
    #[error("topic cannot be empty")]
    MissingTopic,
    #[error("data cannot be empty")]
    MissingPayload,
    #[error("body is not valid JSON: {0}")]
    MalformedPayload(#[source] serde_json::Error),
    #[error("error validating schema: {}", join_violations(.0))]
    Invalid(Vec<Violation>),
}

impl SchemaError {
    /// Field-level violations, if this is an aggregated validation failure.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            SchemaError::Invalid(violations) => violations,
            _ => &[],
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A compiled JSON Schema.
pub struct Schema {
    validator: jsonschema::Validator,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema").finish_non_exhaustive()
    }
}

impl Schema {
    /// Compiles a schema document. Formats (e.g. `uri`) are asserted, not
    /// just annotated.
    fn compile(document: &Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(document)
            .map_err(|err| err.to_string())?;
        Ok(Self { validator })
    }

    /// Validates a serialized JSON body.
    ///
    /// # Errors
    ///
    /// [`SchemaError::MalformedPayload`] if the bytes are not JSON, otherwise
    /// the same errors as [`Schema::validate_value`].
    pub fn validate_bytes(&self, data: &[u8]) -> Result<(), SchemaError> {
        let value: Value = serde_json::from_slice(data).map_err(SchemaError::MalformedPayload)?;
        self.validate_value(&value)
    }

    /// Validates an already-deserialized value.
    ///
    /// # Errors
    ///
    /// [`SchemaError::Invalid`] carrying every violation found.
    pub fn validate_value(&self, value: &Value) -> Result<(), SchemaError> {
        let violations: Vec<Violation> = self
            .validator
            .iter_errors(value)
            .map(|err| {
                let path = err.instance_path.to_string();
                Violation {
                    message: err.to_string(),
                    property_path: if path.is_empty() {
                        "(root)".to_string()
                    } else {
                        path
                    },
                    invalid_value: err.instance.to_string(),
                }
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid(violations))
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

/// Compiled schemas keyed by logical topic, then event type. Read-only after
/// construction.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    topics: HashMap<String, HashMap<EventType, Schema>>,
}

impl SchemaRegistry {
    /// Loads every embedded schema document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaLoadError`] for the first malformed document.
    pub fn load() -> Result<Self, SchemaLoadError> {
        Self::from_documents(EMBEDDED_SCHEMAS.iter().copied())
    }

    /// Builds a registry from `(topic, event type, schema document)` entries.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaLoadError`] for the first document that is not JSON or
    /// is not a valid schema.
    pub fn from_documents<'a, I>(documents: I) -> Result<Self, SchemaLoadError>
    where
        I: IntoIterator<Item = (&'a str, EventType, &'a str)>,
    {
        let mut registry = Self::default();
        for (topic, key, document) in documents {
            let value: Value =
                serde_json::from_str(document).map_err(|source| SchemaLoadError::Malformed {
                    topic: topic.to_string(),
                    key,
                    source,
                })?;
            let schema = Schema::compile(&value).map_err(|message| SchemaLoadError::Invalid {
                topic: topic.to_string(),
                key,
                message,
            })?;
            debug!(topic = %topic, event = %key, "schema loaded");
            registry
                .topics
                .entry(topic.to_string())
                .or_default()
                .insert(key, schema);
        }
        Ok(registry)
    }

    /// Whether at least one schema is registered for `topic`.
    #[must_use]
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Schema for `(topic, event)`, if registered.
    #[must_use]
    pub fn get(&self, topic: &str, event: EventType) -> Option<&Schema> {
        self.topics.get(topic).and_then(|schemas| schemas.get(&event))
    }

    /// Logical topics with at least one schema.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    fn lookup(&self, topic: &str, type_key: &str) -> Result<&Schema, SchemaError> {
        let schemas = self
            .topics
            .get(topic)
            .ok_or_else(|| SchemaError::SchemaNotFound {
                topic: topic.to_string(),
            })?;
        let event: EventType = type_key.parse()?;
        schemas
            .get(&event)
            .ok_or_else(|| SchemaError::EventSchemaNotFound {
                topic: topic.to_string(),
                event,
            })
    }

    /// Validates a raw body against the schema for `(topic, type_key)`.
    ///
    /// # Errors
    ///
    /// [`SchemaError::SchemaNotFound`] if the topic has no schema, otherwise
    /// the lookup or validation failure.
    pub fn validate(&self, topic: &str, type_key: &str, raw: &[u8]) -> Result<(), SchemaError> {
        self.lookup(topic, type_key)?.validate_bytes(raw)
    }

    /// Validates an already-deserialized body against the schema for `(topic, type_key)`.
    ///
    /// # Errors
    ///
    /// Same as [`SchemaRegistry::validate`].
    pub fn validate_value(
        &self,
        topic: &str,
        type_key: &str,
        value: &Value,
    ) -> Result<(), SchemaError> {
        self.lookup(topic, type_key)?.validate_value(value)
    }

    /// Validates a consumed message whose topic has already been translated
    /// to its logical name.
    ///
    /// The `Type` header must name a recognized event type; unknown types fail
    /// closed before any schema lookup.
    ///
    /// # Errors
    ///
    /// Any [`SchemaError`].
    pub fn validate_message(&self, msg: &ConsumedMessage) -> Result<(), SchemaError> {
        let event = msg
            .headers
            .get_str(HDR_TYPE)
            .ok_or(SchemaError::MissingEventType)?;
        let event: EventType = event.parse()?;
        let topic = msg.topic.as_deref().ok_or(SchemaError::MissingTopic)?;
        let payload = msg.payload.as_deref().ok_or(SchemaError::MissingPayload)?;
        self.validate(topic, event.as_str(), payload)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::headers::HeaderSet;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::load().unwrap()
    }

    fn message(topic: &str, event: &str, body: &str) -> ConsumedMessage {
        ConsumedMessage {
            topic: Some(topic.to_string()),
            headers: HeaderSet::from_pairs(&[HDR_TYPE, event]),
            payload: Some(body.as_bytes().to_vec()),
            ..ConsumedMessage::default()
        }
    }

    #[test]
    fn embedded_schemas_load() {
        let registry = registry();
        assert!(registry.has_topic(TOPIC_INTROSPECT));
        assert!(registry.get(TOPIC_INTROSPECT, EventType::Introspect).is_some());
        assert_eq!(registry.topics().count(), 1);
    }

    #[test]
    fn valid_body_passes() {
        registry()
            .validate(
                TOPIC_INTROSPECT,
                "Introspect",
                br#"{"uuid":"abc","url":"https://example.test"}"#,
            )
            .unwrap();
    }

    #[test]
    fn missing_fields_are_reported_together() {
        let err = registry()
            .validate(TOPIC_INTROSPECT, "Introspect", b"{}")
            .unwrap_err();
        assert_eq!(err.violations().len(), 2);
        let text = err.to_string();
        assert!(text.starts_with("error validating schema: "));
        assert!(text.contains("uuid"), "{text}");
        assert!(text.contains("url"), "{text}");
    }

    #[test]
    fn wrong_types_are_reported_with_path_and_value() {
        let err = registry()
            .validate(TOPIC_INTROSPECT, "Introspect", br#"{"uuid":42,"url":"https://x.test"}"#)
            .unwrap_err();
        let violations = err.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].property_path, "/uuid");
        assert_eq!(violations[0].invalid_value, "42");
    }

    #[test]
    fn unknown_topic_fails_closed() {
        let err = registry()
            .validate("not-registered", "Introspect", b"{}")
            .unwrap_err();
        assert!(matches!(err, SchemaError::SchemaNotFound { topic } if topic == "not-registered"));
    }

    #[test]
    fn unknown_type_key_fails() {
        let err = registry()
            .validate(TOPIC_INTROSPECT, "Snapshot", b"{}")
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEventType(UnknownEventType(ref event)) if event == "Snapshot"));
        assert_eq!(err.to_string(), "event not valid: 'Snapshot'");
    }

    #[test]
    fn malformed_body_fails() {
        let err = registry()
            .validate(TOPIC_INTROSPECT, "Introspect", b"not json")
            .unwrap_err();
        assert!(matches!(err, SchemaError::MalformedPayload(_)));
    }

    #[test]
    fn value_and_bytes_paths_agree() {
        let registry = registry();
        let bad = json!({"uuid": ""});
        let from_value = registry
            .validate_value(TOPIC_INTROSPECT, "Introspect", &bad)
            .unwrap_err();
        let from_bytes = registry
            .validate(TOPIC_INTROSPECT, "Introspect", bad.to_string().as_bytes())
            .unwrap_err();
        assert_eq!(from_value.violations(), from_bytes.violations());
        assert_eq!(from_value.violations().len(), 2);
    }

    #[test]
    fn malformed_schema_document_is_fatal() {
        let err = SchemaRegistry::from_documents([("t", EventType::Introspect, "{oops")])
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Malformed { .. }));
        assert!(err.to_string().contains("topic 't' schema 'Introspect'"));
    }

    #[test]
    fn invalid_schema_document_is_fatal() {
        let err = SchemaRegistry::from_documents([(
            "t",
            EventType::Introspect,
            r#"{"type": "no-such-type"}"#,
        )])
        .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Invalid { .. }));
    }

    #[test]
    fn custom_topic_registration() {
        let registry = SchemaRegistry::from_documents([(
            "introspect",
            EventType::Introspect,
            INTROSPECT_REQUEST_SCHEMA,
        )])
        .unwrap();
        registry
            .validate_message(&message(
                "introspect",
                "Introspect",
                r#"{"uuid":"repo-1","url":"https://example.test"}"#,
            ))
            .unwrap();
    }

    #[test]
    fn validate_message_checks_headers_first() {
        let registry = registry();

        let mut msg = message(TOPIC_INTROSPECT, "Introspect", "{}");
        msg.headers = HeaderSet::new();
        assert!(matches!(
            registry.validate_message(&msg),
            Err(SchemaError::MissingEventType)
        ));

        let msg = message(TOPIC_INTROSPECT, "Unknown", r#"{"uuid":"a","url":"https://x.test"}"#);
        assert!(matches!(
            registry.validate_message(&msg),
            Err(SchemaError::UnknownEventType(_))
        ));

        let mut msg = message(TOPIC_INTROSPECT, "Introspect", "{}");
        msg.payload = None;
        assert!(matches!(
            registry.validate_message(&msg),
            Err(SchemaError::MissingPayload)
        ));
    }
}
