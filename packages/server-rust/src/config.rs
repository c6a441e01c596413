//! Broker configuration.
//!
//! One struct with named fields, read from flags or environment variables.
//! Translation to the native client's key/value properties happens only in
//! [`BrokerConfig::consumer_properties`] / [`BrokerConfig::producer_properties`],
//! which the Kafka adapter constructors consume.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use courier_core::topics::TOPIC_INTROSPECT;

/// Where a consumer group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// SASL credentials. Only applied when `username` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
pub struct SaslConfig {
    #[arg(long = "kafka-sasl-username", env = "KAFKA_SASL_USERNAME")]
    pub username: Option<String>,
    #[arg(long = "kafka-sasl-password", env = "KAFKA_SASL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// e.g. `SCRAM-SHA-512`.
    #[arg(long = "kafka-sasl-mechanism", env = "KAFKA_SASL_MECHANISM")]
    pub mechanism: Option<String>,
    /// e.g. `SASL_SSL`.
    #[arg(long = "kafka-sasl-protocol", env = "KAFKA_SASL_PROTOCOL")]
    pub protocol: Option<String>,
    /// CA bundle used to verify the broker certificate.
    #[arg(long = "kafka-capath", env = "KAFKA_CAPATH")]
    pub ca_path: Option<PathBuf>,
}

/// Connection, consumer group, and producer delivery settings.
///
/// Created once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct BrokerConfig {
    /// Comma-separated `host:port` list.
    #[arg(long = "kafka-bootstrap-servers", env = "KAFKA_BOOTSTRAP_SERVERS", default_value = "localhost:9092")]
    pub bootstrap_servers: String,
    #[arg(long = "kafka-group-id", env = "KAFKA_GROUP_ID", default_value = "content-sources")]
    pub group_id: String,
    #[arg(long = "kafka-auto-offset-reset", env = "KAFKA_AUTO_OFFSET_RESET", value_enum, default_value_t = OffsetReset::Latest)]
    pub offset_reset: OffsetReset,
    #[arg(long = "kafka-auto-commit-interval-ms", env = "KAFKA_AUTO_COMMIT_INTERVAL_MS", default_value_t = 5000)]
    pub commit_interval_ms: u64,
    /// Logical topics to subscribe to.
    #[arg(long = "kafka-topics", env = "KAFKA_TOPICS", value_delimiter = ',', default_value = TOPIC_INTROSPECT)]
    pub topics: Vec<String>,
    #[arg(long = "kafka-request-timeout-ms", env = "KAFKA_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,
    /// `-1` waits for all in-sync replicas.
    #[arg(long = "kafka-request-required-acks", env = "KAFKA_REQUEST_REQUIRED_ACKS", default_value_t = -1, allow_negative_numbers = true)]
    pub acks: i32,
    #[arg(long = "kafka-message-send-max-retries", env = "KAFKA_MESSAGE_SEND_MAX_RETRIES", default_value_t = 15)]
    pub max_retries: u32,
    #[arg(long = "kafka-retry-backoff-ms", env = "KAFKA_RETRY_BACKOFF_MS", default_value_t = 100)]
    pub retry_backoff_ms: u64,
    #[command(flatten)]
    pub sasl: SaslConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "content-sources".to_string(),
            offset_reset: OffsetReset::Latest,
            commit_interval_ms: 5000,
            topics: vec![TOPIC_INTROSPECT.to_string()],
            request_timeout_ms: 10_000,
            acks: -1,
            max_retries: 15,
            retry_backoff_ms: 100,
            sasl: SaslConfig::default(),
        }
    }
}

/// Invalid broker configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("bootstrap servers cannot be empty")]
    MissingBootstrapServers,
    #[error("consumer group id cannot be empty")]
    MissingGroupId,
    #[error("at least one topic is required")]
    MissingTopics,
    #[error("topic names cannot be empty")]
    EmptyTopic,
    #[error("sasl {0} is required when a sasl username is set")]
    IncompleteSasl(&'static str),
}

impl BrokerConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Checks the settings a consumer needs.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate_for_consumer(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::MissingGroupId);
        }
        if self.topics.is_empty() {
            return Err(ConfigError::MissingTopics);
        }
        if self.topics.iter().any(|topic| topic.trim().is_empty()) {
            return Err(ConfigError::EmptyTopic);
        }
        Ok(())
    }

    /// Checks the settings a producer needs.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate_for_producer(&self) -> Result<(), ConfigError> {
        self.validate_common()
    }

    fn validate_common(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::MissingBootstrapServers);
        }
        if self.sasl.username.is_some() {
            if self.sasl.password.is_none() {
                return Err(ConfigError::IncompleteSasl("password"));
            }
            if self.sasl.mechanism.is_none() {
                return Err(ConfigError::IncompleteSasl("mechanism"));
            }
        }
        Ok(())
    }

    /// Native client properties for a consumer.
    #[must_use]
    pub fn consumer_properties(&self) -> BTreeMap<&'static str, String> {
        let mut props = self.common_properties();
        props.insert("group.id", self.group_id.clone());
        props.insert("auto.offset.reset", self.offset_reset.as_str().to_string());
        props.insert("auto.commit.interval.ms", self.commit_interval_ms.to_string());
        props.insert("allow.auto.create.topics", "true".to_string());
        props
    }

    /// Native client properties for a producer.
    #[must_use]
    pub fn producer_properties(&self) -> BTreeMap<&'static str, String> {
        let mut props = self.common_properties();
        props.insert("request.required.acks", self.acks.to_string());
        props.insert("message.send.max.retries", self.max_retries.to_string());
        props.insert("retry.backoff.ms", self.retry_backoff_ms.to_string());
        props.insert("request.timeout.ms", self.request_timeout_ms.to_string());
        props
    }

    fn common_properties(&self) -> BTreeMap<&'static str, String> {
        let mut props = BTreeMap::new();
        props.insert("bootstrap.servers", self.bootstrap_servers.clone());

        let sasl = &self.sasl;
        if let Some(username) = &sasl.username {
            props.insert("sasl.username", username.clone());
            props.insert("sasl.password", sasl.password.clone().unwrap_or_default());
            props.insert("sasl.mechanism", sasl.mechanism.clone().unwrap_or_default());
            if let Some(protocol) = &sasl.protocol {
                props.insert("security.protocol", protocol.clone());
            }
            if let Some(ca_path) = &sasl.ca_path {
                props.insert("ssl.ca.location", ca_path.display().to_string());
            }
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        broker: BrokerConfig,
    }

    fn with_sasl() -> BrokerConfig {
        BrokerConfig {
            sasl: SaslConfig {
                username: Some("svc".to_string()),
                password: Some("secret".to_string()),
                mechanism: Some("SCRAM-SHA-512".to_string()),
                protocol: Some("SASL_SSL".to_string()),
                ca_path: Some(PathBuf::from("/etc/kafka/ca.crt")),
            },
            ..BrokerConfig::default()
        }
    }

    #[test]
    fn defaults_match_deployment_values() {
        let config = BrokerConfig::default();
        assert_eq!(config.group_id, "content-sources");
        assert_eq!(config.offset_reset, OffsetReset::Latest);
        assert_eq!(config.commit_interval_ms, 5000);
        assert_eq!(config.acks, -1);
        assert_eq!(config.max_retries, 15);
        assert_eq!(config.retry_backoff_ms, 100);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.topics, vec![TOPIC_INTROSPECT]);
    }

    #[test]
    fn flags_parse_into_config() {
        let cli = Cli::parse_from([
            "test",
            "--kafka-bootstrap-servers",
            "kafka-1:9092,kafka-2:9092",
            "--kafka-auto-offset-reset",
            "earliest",
            "--kafka-topics",
            "a,b",
            "--kafka-request-required-acks",
            "1",
        ]);
        assert_eq!(cli.broker.bootstrap_servers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(cli.broker.offset_reset, OffsetReset::Earliest);
        assert_eq!(cli.broker.topics, vec!["a", "b"]);
        assert_eq!(cli.broker.acks, 1);
        assert!(cli.broker.sasl.username.is_none());
    }

    #[test]
    fn unknown_offset_reset_is_rejected() {
        let result = Cli::try_parse_from(["test", "--kafka-auto-offset-reset", "smallest"]);
        assert!(result.is_err());
    }

    #[test]
    fn consumer_validation() {
        assert!(BrokerConfig::default().validate_for_consumer().is_ok());

        let config = BrokerConfig {
            bootstrap_servers: String::new(),
            ..BrokerConfig::default()
        };
        assert_eq!(
            config.validate_for_consumer(),
            Err(ConfigError::MissingBootstrapServers)
        );

        let config = BrokerConfig {
            group_id: " ".to_string(),
            ..BrokerConfig::default()
        };
        assert_eq!(config.validate_for_consumer(), Err(ConfigError::MissingGroupId));

        let config = BrokerConfig {
            topics: Vec::new(),
            ..BrokerConfig::default()
        };
        assert_eq!(config.validate_for_consumer(), Err(ConfigError::MissingTopics));
        // Producers do not subscribe.
        assert!(config.validate_for_producer().is_ok());

        let config = BrokerConfig {
            topics: vec![String::new()],
            ..BrokerConfig::default()
        };
        assert_eq!(config.validate_for_consumer(), Err(ConfigError::EmptyTopic));
    }

    #[test]
    fn sasl_username_requires_password_and_mechanism() {
        let mut config = with_sasl();
        assert!(config.validate_for_producer().is_ok());

        config.sasl.mechanism = None;
        assert_eq!(
            config.validate_for_producer(),
            Err(ConfigError::IncompleteSasl("mechanism"))
        );

        config.sasl.password = None;
        let err = config.validate_for_producer().unwrap_err();
        assert_eq!(err.to_string(), "sasl password is required when a sasl username is set");
    }

    #[test]
    fn consumer_properties_map_named_fields() {
        let props = BrokerConfig::default().consumer_properties();
        assert_eq!(props["bootstrap.servers"], "localhost:9092");
        assert_eq!(props["group.id"], "content-sources");
        assert_eq!(props["auto.offset.reset"], "latest");
        assert_eq!(props["auto.commit.interval.ms"], "5000");
        assert!(!props.contains_key("request.required.acks"));
        assert!(!props.contains_key("sasl.username"));
    }

    #[test]
    fn producer_properties_map_delivery_settings() {
        let props = BrokerConfig::default().producer_properties();
        assert_eq!(props["request.required.acks"], "-1");
        assert_eq!(props["message.send.max.retries"], "15");
        assert_eq!(props["retry.backoff.ms"], "100");
        assert!(!props.contains_key("group.id"));
    }

    #[test]
    fn sasl_properties_only_with_username() {
        let props = with_sasl().producer_properties();
        assert_eq!(props["sasl.username"], "svc");
        assert_eq!(props["sasl.password"], "secret");
        assert_eq!(props["sasl.mechanism"], "SCRAM-SHA-512");
        assert_eq!(props["security.protocol"], "SASL_SSL");
        assert_eq!(props["ssl.ca.location"], "/etc/kafka/ca.crt");
    }
}
