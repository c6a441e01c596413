//! Translation between logical (internal) topic names and the names actually
//! provisioned on the broker.
//!
//! The deployment platform may create a topic under a different name than the
//! one the service requested (e.g. `platform-tmp-12345` for the requested
//! `platform.content-sources.introspect`). Producers translate logical names to
//! real ones before publishing; the consumer loop translates the observed real
//! name back before schema lookup.
//!
//! The translation is built once at startup and is read-only afterwards, so it
//! can be shared behind an `Arc` without locking.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

/// Logical topic carrying repository introspection requests.
pub const TOPIC_INTROSPECT: &str = "platform.content-sources.introspect";

/// Environment variable naming the platform-provided application config file.
pub const CLOWDER_CONFIG_ENV: &str = "ACG_CONFIG";

/// Bidirectional topic name mapping.
///
/// Both lookups are total: a name without a mapping is returned unchanged.
#[derive(Debug, Clone, Default)]
pub struct TopicTranslation {
    internal_to_real: HashMap<String, String>,
    real_to_internal: HashMap<String, String>,
}

impl TopicTranslation {
    /// Creates a translation where every topic maps to itself.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Creates a translation from `(logical, real)` pairs.
    ///
    /// Pairs with an empty side are kept as given (so a misconfigured source
    /// surfaces as a translation failure at publish/consume time) but are
    /// reported at `warn`.
    #[must_use]
    pub fn new<I, L, R>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, R)>,
        L: Into<String>,
        R: Into<String>,
    {
        let mut translation = Self::default();
        for (logical, real) in pairs {
            let logical = logical.into();
            let real = real.into();
            if logical.is_empty() || real.is_empty() {
                warn!(logical = %logical, real = %real, "topic mapping entry has an empty name");
            }
            debug!(logical = %logical, real = %real, "topic mapping registered");
            translation
                .internal_to_real
                .insert(logical.clone(), real.clone());
            translation.real_to_internal.insert(real, logical);
        }
        translation
    }

    /// Builds the translation from a Clowder-style application config file.
    ///
    /// # Errors
    ///
    /// Returns [`MappingSourceError`] if the file cannot be read or parsed.
    pub fn from_clowder_file(path: impl AsRef<Path>) -> Result<Self, MappingSourceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| MappingSourceError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_clowder_json(&raw)
    }

    /// Builds the translation from the JSON text of a Clowder-style config.
    ///
    /// A config without a `kafka` section yields the identity translation.
    ///
    /// # Errors
    ///
    /// Returns [`MappingSourceError::Parse`] for malformed JSON.
    pub fn from_clowder_json(raw: &str) -> Result<Self, MappingSourceError> {
        let config: ClowderConfig = serde_json::from_str(raw).map_err(MappingSourceError::Parse)?;
        let topics = config.kafka.map(|kafka| kafka.topics).unwrap_or_default();
        Ok(Self::new(
            topics
                .into_iter()
                .map(|topic| (topic.requested_name, topic.name)),
        ))
    }

    /// Loads the translation from the file named by [`CLOWDER_CONFIG_ENV`],
    /// or returns the identity translation when the variable is unset.
    ///
    /// # Errors
    ///
    /// Returns [`MappingSourceError`] if the variable is set but the file is
    /// unreadable or malformed.
    pub fn from_env() -> Result<Self, MappingSourceError> {
        match std::env::var_os(CLOWDER_CONFIG_ENV) {
            Some(path) => Self::from_clowder_file(path),
            None => Ok(Self::identity()),
        }
    }

    /// Translates a logical topic to the real broker topic. Used by producers.
    #[must_use]
    pub fn get_real<'a>(&'a self, internal: &'a str) -> &'a str {
        self.internal_to_real
            .get(internal)
            .map_or(internal, String::as_str)
    }

    /// Translates a real broker topic back to its logical name. Used by consumers.
    #[must_use]
    pub fn get_internal<'a>(&'a self, real: &'a str) -> &'a str {
        self.real_to_internal
            .get(real)
            .map_or(real, String::as_str)
    }

    /// Number of explicit mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.internal_to_real.len()
    }

    /// Returns `true` for the identity translation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.internal_to_real.is_empty()
    }
}

/// Errors reading the external topic-mapping source.
#[derive(Debug, thiserror::Error)]
pub enum MappingSourceError {
    #[error("failed to read topic mapping source '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse topic mapping source: {0}")]
    Parse(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ClowderConfig {
    #[serde(default)]
    kafka: Option<ClowderKafka>,
}

#[derive(Debug, Deserialize)]
struct ClowderKafka {
    #[serde(default)]
    topics: Vec<ClowderTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClowderTopic {
    requested_name: String,
    name: String,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;

    use super::*;

    fn sample() -> TopicTranslation {
        TopicTranslation::new([
            (TOPIC_INTROSPECT, "platform-tmp-12345"),
            ("platform.notifications.ingress", "platform-tmp-67890"),
        ])
    }

    #[test]
    fn identity_passes_everything_through() {
        let tm = TopicTranslation::identity();
        assert!(tm.is_empty());
        assert_eq!(tm.get_real(TOPIC_INTROSPECT), TOPIC_INTROSPECT);
        assert_eq!(tm.get_internal("whatever"), "whatever");
        assert_eq!(tm.get_real(""), "");
    }

    #[test]
    fn mapped_topics_translate_both_ways() {
        let tm = sample();
        assert_eq!(tm.len(), 2);
        assert_eq!(tm.get_real(TOPIC_INTROSPECT), "platform-tmp-12345");
        assert_eq!(tm.get_internal("platform-tmp-12345"), TOPIC_INTROSPECT);
    }

    #[test]
    fn unmapped_topics_pass_through() {
        let tm = sample();
        assert_eq!(tm.get_real("not-mapped"), "not-mapped");
        assert_eq!(tm.get_internal("not-mapped"), "not-mapped");
    }

    #[test]
    fn empty_side_is_kept_as_configured() {
        let tm = TopicTranslation::new([("introspect", "")]);
        assert_eq!(tm.get_real("introspect"), "");
    }

    #[test]
    fn clowder_json_builds_mapping() {
        let raw = r#"{
            "kafka": {
                "brokers": [{"hostname": "kafka", "port": 9092}],
                "topics": [
                    {"requestedName": "platform.content-sources.introspect", "name": "platform-tmp-12345"}
                ]
            }
        }"#;
        let tm = TopicTranslation::from_clowder_json(raw).unwrap();
        assert_eq!(tm.get_real(TOPIC_INTROSPECT), "platform-tmp-12345");
    }

    #[test]
    fn clowder_json_without_kafka_is_identity() {
        let tm = TopicTranslation::from_clowder_json(r#"{"webPort": 8000}"#).unwrap();
        assert!(tm.is_empty());
    }

    #[test]
    fn clowder_json_malformed_is_rejected() {
        let err = TopicTranslation::from_clowder_json("{not json").unwrap_err();
        assert!(matches!(err, MappingSourceError::Parse(_)));
    }

    #[test]
    fn clowder_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"kafka": {{"topics": [{{"requestedName": "a", "name": "b"}}]}}}}"#
        )
        .unwrap();
        let tm = TopicTranslation::from_clowder_file(file.path()).unwrap();
        assert_eq!(tm.get_real("a"), "b");
        assert_eq!(tm.get_internal("b"), "a");
    }

    #[test]
    fn clowder_file_missing_reports_path() {
        let err = TopicTranslation::from_clowder_file("/nonexistent/courier/cdappconfig.json")
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/courier/cdappconfig.json"));
    }

    proptest! {
        #[test]
        fn registered_topics_are_stable(
            pairs in proptest::collection::hash_map("[a-z.]{1,16}", "[a-z0-9-]{1,16}", 1..8)
        ) {
            // Distinct real names keep the reverse map injective.
            let mut seen = std::collections::HashSet::new();
            let pairs: Vec<_> = pairs.into_iter().filter(|(_, real)| seen.insert(real.clone())).collect();
            let tm = TopicTranslation::new(pairs.clone());
            for (logical, _) in &pairs {
                let real = tm.get_real(logical);
                prop_assert_eq!(tm.get_real(tm.get_internal(real)), real);
                prop_assert_eq!(tm.get_internal(real), logical.as_str());
            }
        }

        #[test]
        fn unregistered_topics_are_identity(topic in "[A-Z]{1,12}") {
            let tm = sample();
            prop_assert_eq!(tm.get_real(&topic), topic.as_str());
            prop_assert_eq!(tm.get_internal(&topic), topic.as_str());
        }
    }
}
