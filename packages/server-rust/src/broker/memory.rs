//! In-process broker.
//!
//! Topics are split into a fixed number of partitions; a record's partition is
//! the FNV-1a hash of its key modulo the partition count, so records sharing
//! a key stay ordered. Each consumer group tracks its own committed offsets.
//! Offsets are committed as soon as a record is handed out, which gives the
//! same at-most-once-per-poll behaviour as auto-commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use courier_core::{ConsumedMessage, Envelope, HeaderSet};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{BrokerConsumer, BrokerError, BrokerProducer, Pingable};
use crate::config::OffsetReset;

const DEFAULT_PARTITIONS: u32 = 3;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over raw key bytes.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Vec<u8>,
    headers: HeaderSet,
    payload: Vec<u8>,
    timestamp_ms: i64,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// topic -> partition -> log
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) -> next offset to read
    committed: HashMap<(String, String, i32), i64>,
}

impl BrokerState {
    fn partitions_mut(&mut self, topic: &str, count: u32) -> &mut Vec<Vec<StoredRecord>> {
        self.logs
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); count as usize])
    }
}

#[derive(Debug)]
struct Inner {
    partitions: u32,
    state: Mutex<BrokerState>,
    published: Notify,
}

/// Shared in-process broker. Cloning yields another handle to the same logs.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates a broker whose topics have `partitions` partitions (at least one).
    #[must_use]
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(BrokerState::default()),
                published: Notify::new(),
            }),
        }
    }

    /// Partition a key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &[u8]) -> i32 {
        i32::try_from(fnv1a(key) % self.inner.partitions).unwrap_or(0)
    }

    /// Creates a consumer in `group_id`. Call [`BrokerConsumer::subscribe`]
    /// before polling.
    #[must_use]
    pub fn consumer(&self, group_id: impl Into<String>, offset_reset: OffsetReset) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            group_id: group_id.into(),
            offset_reset,
            assignments: Vec::new(),
            cursor: 0,
        }
    }

    /// Every record stored under the real topic, in partition then offset order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<ConsumedMessage> {
        let state = self.inner.state.lock();
        let Some(partitions) = state.logs.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(offset, record)| to_message(topic, partition, offset, record))
            })
            .collect()
    }

    /// Total number of records across all topics.
    #[must_use]
    pub fn record_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.logs.values().flatten().map(Vec::len).sum()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerProducer for MemoryBroker {
    async fn send(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let Envelope {
            topic,
            key,
            headers,
            payload,
        } = envelope;
        let partition = self.partition_for(key.as_bytes());
        let record = StoredRecord {
            key: key.into_bytes(),
            headers,
            payload,
            timestamp_ms: now_ms(),
        };

        {
            let mut state = self.inner.state.lock();
            let partitions = state.partitions_mut(&topic, self.inner.partitions);
            let Some(log) = usize::try_from(partition).ok().and_then(|p| partitions.get_mut(p)) else {
                return Err(BrokerError::Send(format!("no partition {partition} for topic {topic}")));
            };
            log.push(record);
            debug!(topic = %topic, partition, offset = log.len() - 1, "record appended");
        }

        self.inner.published.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Pingable for MemoryBroker {
    async fn ping(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Consumer-group member reading from a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group_id: String,
    offset_reset: OffsetReset,
    /// (topic, partition) pairs owned by this consumer.
    assignments: Vec<(String, i32)>,
    /// Index into `assignments` where the next scan starts.
    cursor: usize,
}

impl MemoryConsumer {
    /// Hands out the next unread record and commits it.
    ///
    /// Scans start just after the assignment served last.
    fn take_next(&mut self) -> Option<ConsumedMessage> {
        let count = self.assignments.len();
        let mut state = self.broker.inner.state.lock();
        for step in 0..count {
            let idx = (self.cursor + step) % count;
            let (topic, partition) = &self.assignments[idx];
            let group_key = (self.group_id.clone(), topic.clone(), *partition);
            let next = state.committed.get(&group_key).copied().unwrap_or(0);
            let record = state
                .logs
                .get(topic)
                .and_then(|partitions| partitions.get(usize::try_from(*partition).ok()?))
                .and_then(|log| log.get(usize::try_from(next).ok()?))
                .cloned();
            if let Some(record) = record {
                state.committed.insert(group_key, next + 1);
                let (Ok(partition_idx), Ok(offset)) =
                    (usize::try_from(*partition), usize::try_from(next))
                else {
                    continue;
                };
                self.cursor = (idx + 1) % count;
                return Some(to_message(topic, partition_idx, offset, &record));
            }
        }
        None
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::Subscribe("topic list is empty".to_string()));
        }

        let partitions = self.broker.inner.partitions;
        let mut state = self.broker.inner.state.lock();
        self.assignments.clear();
        self.cursor = 0;
        for topic in topics {
            let ends: Vec<i64> = state
                .partitions_mut(topic, partitions)
                .iter()
                .map(|log| i64::try_from(log.len()).unwrap_or(i64::MAX))
                .collect();
            for (partition, end) in ends.into_iter().enumerate() {
                let partition = i32::try_from(partition)
                    .map_err(|_| BrokerError::Subscribe(format!("too many partitions for {topic}")))?;
                let start = match self.offset_reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => end,
                };
                state
                    .committed
                    .entry((self.group_id.clone(), topic.clone(), partition))
                    .or_insert(start);
                self.assignments.push((topic.clone(), partition));
            }
        }
        debug!(group = %self.group_id, topics = ?topics, "subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, BrokerError> {
        if self.assignments.is_empty() {
            return Err(BrokerError::Poll("consumer is not subscribed".to_string()));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let inner = Arc::clone(&self.broker.inner);
        loop {
            let notified = inner.published.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed.
            notified.as_mut().enable();

            if let Some(message) = self.take_next() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

fn to_message(topic: &str, partition: usize, offset: usize, record: &StoredRecord) -> ConsumedMessage {
    ConsumedMessage {
        topic: Some(topic.to_string()),
        partition: i32::try_from(partition).unwrap_or(i32::MAX),
        offset: i64::try_from(offset).unwrap_or(i64::MAX),
        key: Some(record.key.clone()),
        headers: record.headers.clone(),
        payload: Some(record.payload.clone()),
        timestamp_ms: Some(record.timestamp_ms),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_millis()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use courier_core::headers::HDR_TYPE;

    use super::*;

    fn envelope(topic: &str, key: &str, body: &str) -> Envelope {
        Envelope {
            topic: topic.to_string(),
            key: key.to_string(),
            headers: HeaderSet::from_pairs(&[HDR_TYPE, "Introspect"]),
            payload: body.as_bytes().to_vec(),
        }
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn fnv1a_known_values() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
    }

    #[test]
    fn same_key_same_partition() {
        let broker = MemoryBroker::with_partitions(8);
        assert_eq!(broker.partition_for(b"repo-1"), broker.partition_for(b"repo-1"));
        assert!((0..8).contains(&broker.partition_for(b"repo-2")));
    }

    #[tokio::test]
    async fn send_stores_record_with_headers() {
        let broker = MemoryBroker::new();
        broker.send(envelope("t", "repo-1", "{}")).await.unwrap();

        let records = broker.records("t");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key_str(), "repo-1");
        assert_eq!(records[0].headers.get_str(HDR_TYPE), Some("Introspect"));
        assert_eq!(records[0].partition, broker.partition_for(b"repo-1"));
        assert!(records[0].timestamp_ms.is_some());
        assert_eq!(broker.record_count(), 1);
    }

    #[tokio::test]
    async fn earliest_reads_existing_records() {
        let broker = MemoryBroker::new();
        broker.send(envelope("t", "k", "1")).await.unwrap();

        let mut consumer = broker.consumer("g", OffsetReset::Earliest);
        consumer.subscribe(&topics(&["t"])).await.unwrap();

        let msg = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(msg.payload.as_deref(), Some(&b"1"[..]));
        assert!(consumer.poll(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_skips_existing_records() {
        let broker = MemoryBroker::new();
        broker.send(envelope("t", "k", "old")).await.unwrap();

        let mut consumer = broker.consumer("g", OffsetReset::Latest);
        consumer.subscribe(&topics(&["t"])).await.unwrap();
        assert!(consumer.poll(Duration::from_millis(20)).await.unwrap().is_none());

        broker.send(envelope("t", "k", "new")).await.unwrap();
        let msg = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(msg.payload.as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn records_with_same_key_keep_order() {
        let broker = MemoryBroker::new();
        for body in ["1", "2", "3"] {
            broker.send(envelope("t", "same", body)).await.unwrap();
        }

        let mut consumer = broker.consumer("g", OffsetReset::Earliest);
        consumer.subscribe(&topics(&["t"])).await.unwrap();

        let mut offsets = Vec::new();
        while let Some(msg) = consumer.poll(Duration::from_millis(20)).await.unwrap() {
            offsets.push(msg.offset);
        }
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn group_members_share_committed_offsets() {
        let broker = MemoryBroker::new();
        broker.send(envelope("t", "k", "once")).await.unwrap();

        let mut first = broker.consumer("g", OffsetReset::Earliest);
        first.subscribe(&topics(&["t"])).await.unwrap();
        assert!(first.poll(Duration::from_millis(20)).await.unwrap().is_some());

        let mut second = broker.consumer("g", OffsetReset::Earliest);
        second.subscribe(&topics(&["t"])).await.unwrap();
        assert!(second.poll(Duration::from_millis(20)).await.unwrap().is_none());

        let mut other_group = broker.consumer("other", OffsetReset::Earliest);
        other_group.subscribe(&topics(&["t"])).await.unwrap();
        assert!(other_group.poll(Duration::from_millis(20)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer("g", OffsetReset::Latest);
        consumer.subscribe(&topics(&["t"])).await.unwrap();

        let producer = broker.clone();
        let publisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send(envelope("t", "k", "late")).await.unwrap();
        });

        let msg = consumer.poll(Duration::from_secs(2)).await.unwrap();
        assert!(msg.is_some());
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn busy_topic_does_not_starve_others() {
        let broker = MemoryBroker::with_partitions(1);
        let mut consumer = broker.consumer("g", OffsetReset::Latest);
        consumer.subscribe(&topics(&["a", "b"])).await.unwrap();

        broker.send(envelope("b", "k", "quiet")).await.unwrap();
        let mut served_b = false;
        for _ in 0..10 {
            broker.send(envelope("a", "k", "busy")).await.unwrap();
            let msg = consumer.poll(Duration::from_millis(20)).await.unwrap().unwrap();
            if msg.topic.as_deref() == Some("b") {
                served_b = true;
                break;
            }
        }
        assert!(served_b, "topic b was never served");
    }

    #[tokio::test]
    async fn alternates_between_partitions_with_backlog() {
        let broker = MemoryBroker::with_partitions(1);
        for body in ["a1", "a2", "a3"] {
            broker.send(envelope("a", "k", body)).await.unwrap();
        }
        for body in ["b1", "b2"] {
            broker.send(envelope("b", "k", body)).await.unwrap();
        }

        let mut consumer = broker.consumer("g", OffsetReset::Earliest);
        consumer.subscribe(&topics(&["a", "b"])).await.unwrap();

        let mut order = Vec::new();
        while let Some(msg) = consumer.poll(Duration::from_millis(20)).await.unwrap() {
            order.push(String::from_utf8(msg.payload.unwrap()).unwrap());
        }
        assert_eq!(order, vec!["a1", "b1", "a2", "b2", "a3"]);
    }

    #[tokio::test]
    async fn poll_before_subscribe_fails() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer("g", OffsetReset::Latest);
        let err = consumer.poll(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Poll(_)));
    }

    #[tokio::test]
    async fn subscribe_requires_topics() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer("g", OffsetReset::Latest);
        assert!(matches!(
            consumer.subscribe(&[]).await,
            Err(BrokerError::Subscribe(_))
        ));
    }
}
