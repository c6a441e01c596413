//! Consumer loop: poll, translate, validate, dispatch.
//!
//! ```text
//! Idle -> Polling -> timeout --------------------> (shutdown?) -> Polling | Terminated
//!                 -> message -> Validating -> Dispatching -> Polling
//! ```
//!
//! Every per-message failure is logged with the message context and the loop
//! moves on. There is no retry, offset rollback, or dead-letter topic.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use courier_core::{ConsumedMessage, SchemaError, SchemaLoadError, SchemaRegistry, TopicTranslation};
use tracing::{debug, error, info, warn};

use super::handler::DispatchHandler;
use crate::broker::{BrokerConsumer, BrokerError};
use crate::config::{BrokerConfig, ConfigError};
use crate::network::shutdown::ShutdownController;

/// Upper bound on a single poll; also the shutdown observation interval.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Validating,
    Dispatching,
    Terminated,
}

/// Why a consumed message was dropped.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("topic cannot be empty")]
    MissingTopic,
    #[error("topic mapping not found for: {topic}")]
    UnmappedTopic { topic: String },
    #[error(transparent)]
    Validation(#[from] SchemaError),
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),
}

/// Construction failures. Fatal; the caller decides whether to abort.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("invalid broker configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load schemas: {0}")]
    Schemas(#[from] SchemaLoadError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub poll_errors: u64,
}

/// Owns one broker consumer and feeds validated messages to a handler.
pub struct ConsumerLoop<C> {
    consumer: C,
    handler: Arc<dyn DispatchHandler>,
    schemas: Arc<SchemaRegistry>,
    translation: Arc<TopicTranslation>,
    poll_timeout: Duration,
    state: LoopState,
    stats: ConsumerStats,
}

impl<C: BrokerConsumer> ConsumerLoop<C> {
    #[must_use]
    pub fn new(
        consumer: C,
        handler: Arc<dyn DispatchHandler>,
        schemas: Arc<SchemaRegistry>,
        translation: Arc<TopicTranslation>,
    ) -> Self {
        Self {
            consumer,
            handler,
            schemas,
            translation,
            poll_timeout: POLL_TIMEOUT,
            state: LoopState::Idle,
            stats: ConsumerStats::default(),
        }
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Subscribes to the real names of the given logical topics.
    ///
    /// Topics without a schema are accepted but every message on them will
    /// be rejected; a warning is logged for each.
    ///
    /// # Errors
    ///
    /// The broker client's subscription error.
    pub async fn subscribe(&mut self, logical_topics: &[String]) -> Result<(), BrokerError> {
        for topic in logical_topics {
            if !self.schemas.has_topic(topic) {
                warn!(topic = %topic, "subscribed topic has no schema; its messages will be rejected");
            }
        }
        let real: Vec<String> = logical_topics
            .iter()
            .map(|topic| self.translation.get_real(topic).to_string())
            .collect();
        self.consumer.subscribe(&real).await
    }

    /// Runs until `shutdown` is triggered.
    ///
    /// Shutdown is observed only after a poll returns without a message, so a
    /// message already received is always processed to completion.
    pub async fn run(&mut self, shutdown: &ShutdownController) -> ConsumerStats {
        info!("consumer loop awaiting to consume messages");
        if !shutdown.is_shutdown_triggered() {
            shutdown.set_ready();
        }

        loop {
            self.state = LoopState::Polling;
            match self.consumer.poll(self.poll_timeout).await {
                Ok(Some(mut msg)) => {
                    let _in_flight = shutdown.in_flight_guard();
                    self.stats.received += 1;
                    match self.process_consumed_message(&mut msg).await {
                        Ok(()) => {
                            self.stats.dispatched += 1;
                            metrics::counter!("courier_consumer_messages_total", "result" => "success").increment(1);
                        }
                        Err(err) => {
                            self.stats.failed += 1;
                            metrics::counter!("courier_consumer_messages_total", "result" => "failure").increment(1);
                            log_message_error(&msg, &err);
                        }
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    self.stats.poll_errors += 1;
                    error!(error = %err, "error awaiting to read a message");
                }
            }

            if shutdown.is_shutdown_triggered() {
                info!("shutdown requested; consumer loop terminating");
                break;
            }
        }

        self.state = LoopState::Terminated;
        info!(
            received = self.stats.received,
            dispatched = self.stats.dispatched,
            failed = self.stats.failed,
            "consumer loop stopped"
        );
        self.stats
    }

    /// Translates the topic to its logical name in place, validates, and
    /// dispatches.
    ///
    /// # Errors
    ///
    /// Any [`ConsumeError`]; the message is not retried.
    pub async fn process_consumed_message(&mut self, msg: &mut ConsumedMessage) -> Result<(), ConsumeError> {
        record_latency(msg);

        let real_topic = msg
            .topic
            .as_deref()
            .filter(|topic| !topic.is_empty())
            .ok_or(ConsumeError::MissingTopic)?;
        let internal = self.translation.get_internal(real_topic);
        if internal.is_empty() {
            return Err(ConsumeError::UnmappedTopic {
                topic: real_topic.to_string(),
            });
        }
        debug!(topic = %real_topic, requested_topic = %internal, "topic mapping");
        msg.topic = Some(internal.to_string());

        info!(
            topic = %msg.topic_str(),
            key = %msg.key_str(),
            headers = %msg.headers,
            "consuming message"
        );

        self.state = LoopState::Validating;
        self.schemas.validate_message(msg)?;

        self.state = LoopState::Dispatching;
        self.handler.on_message(msg).await.map_err(ConsumeError::Handler)
    }
}

/// Validates `config`, loads the embedded schemas, and subscribes `consumer`
/// to the configured topics.
///
/// # Errors
///
/// [`StartError`] for invalid configuration, malformed schemas, or a failed
/// subscription.
pub async fn start<C: BrokerConsumer>(
    consumer: C,
    config: &BrokerConfig,
    translation: Arc<TopicTranslation>,
    handler: Arc<dyn DispatchHandler>,
) -> Result<ConsumerLoop<C>, StartError> {
    config.validate_for_consumer()?;
    let schemas = Arc::new(SchemaRegistry::load()?);
    let mut consumer_loop = ConsumerLoop::new(consumer, handler, schemas, translation);
    consumer_loop.subscribe(&config.topics).await?;
    Ok(consumer_loop)
}

fn log_message_error(msg: &ConsumedMessage, err: &ConsumeError) {
    error!(
        topic = %msg.topic_str(),
        partition = msg.partition,
        offset = msg.offset,
        key = %msg.key_str(),
        headers = %msg.headers,
        error = %err,
        "error processing event message"
    );
}

#[allow(clippy::cast_precision_loss)]
fn record_latency(msg: &ConsumedMessage) {
    let Some(sent_ms) = msg.timestamp_ms else {
        return;
    };
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_millis()).ok())
        .unwrap_or_default();
    let elapsed_ms = now_ms.saturating_sub(sent_ms).max(0);
    metrics::histogram!("courier_consumer_message_latency_seconds").record(elapsed_ms as f64 / 1000.0);
}
