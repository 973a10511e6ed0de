//! In-process bus that records every delivered message.

use crate::bus::{Ack, MessageBus};
use crate::error::{BusError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A message as delivered to a [`MemoryBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, i32>,
    /// Next offset per topic partition.
    offsets: HashMap<(String, i32), i64>,
    delivered: VecDeque<Delivered>,
    /// Most recent messages kept; `None` keeps everything.
    retention: Option<usize>,
    delivered_count: u64,
    failure: Option<String>,
    attempts: u64,
}

/// Records messages in memory. Clones share the same log.
///
/// Every topic is auto-created with one partition on first use unless it was
/// created explicitly.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that keeps only the last `retention` messages. Offsets and
    /// [`delivered_count`](Self::delivered_count) still cover every message.
    pub fn with_retention(retention: usize) -> Self {
        let bus = Self::default();
        bus.lock().retention = Some(retention);
        bus
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later send fail with `cause`.
    pub fn fail_with(&self, cause: &str) {
        self.lock().failure = Some(cause.to_string());
    }

    pub fn recover(&self) {
        self.lock().failure = None;
    }

    /// Retained messages, in delivery order.
    pub fn delivered(&self) -> Vec<Delivered> {
        self.lock().delivered.iter().cloned().collect()
    }

    /// Messages delivered so far, retained or not.
    pub fn delivered_count(&self) -> u64 {
        self.lock().delivered_count
    }

    /// Payloads delivered to `topic`, as text.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.lock()
            .delivered
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| String::from_utf8_lossy(&m.payload).into_owned())
            .collect()
    }

    /// Sends attempted, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    pub fn partitions(&self, topic: &str) -> Option<i32> {
        self.lock().topics.get(topic).copied()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Ack> {
        let mut state = self.lock();
        state.attempts += 1;
        if let Some(cause) = &state.failure {
            return Err(BusError::Publish(cause.clone()));
        }
        let partitions = *state.topics.entry(topic.to_string()).or_insert(1);
        let partition = partition_for(key, partitions);
        let next = state
            .offsets
            .entry((topic.to_string(), partition))
            .or_insert(0);
        let offset = *next;
        *next += 1;

        state.delivered_count += 1;
        if state.retention != Some(0) {
            state.delivered.push_back(Delivered {
                topic: topic.to_string(),
                key: key.to_string(),
                payload,
            });
            if let Some(retention) = state.retention {
                while state.delivered.len() > retention {
                    state.delivered.pop_front();
                }
            }
        }
        Ok(Ack { partition, offset })
    }

    async fn create_topic(&self, topic: &str, partitions: i32) -> Result<()> {
        if partitions < 1 {
            return Err(BusError::TopicCreation(format!(
                "invalid partition count {partitions} for topic {topic}"
            )));
        }
        let mut state = self.lock();
        if state.topics.contains_key(topic) {
            debug!("Topic '{}' already exists", topic);
        } else {
            state.topics.insert(topic.to_string(), partitions);
            debug!("Topic '{}' created with {} partitions", topic, partitions);
        }
        Ok(())
    }
}

fn partition_for(key: &str, partitions: i32) -> i32 {
    let hash = key
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    (hash % partitions.max(1) as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_deliveries_in_order() {
        let bus = MemoryBus::new();
        bus.send("test", "1", b"a".to_vec()).await.unwrap();
        bus.send("other", "1", b"b".to_vec()).await.unwrap();
        let ack = bus.send("test", "1", b"c".to_vec()).await.unwrap();

        assert_eq!(ack, Ack { partition: 0, offset: 1 });
        assert_eq!(bus.payloads("test"), vec!["a", "c"]);
        assert_eq!(bus.delivered().len(), 3);
    }

    #[tokio::test]
    async fn test_same_key_same_partition() {
        let bus = MemoryBus::new();
        bus.create_topic("test", 3).await.unwrap();
        let first = bus.send("test", "1050", Vec::new()).await.unwrap();
        let second = bus.send("test", "1050", Vec::new()).await.unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
        assert!((0..3).contains(&first.partition));
    }

    #[tokio::test]
    async fn test_offsets_count_per_partition() {
        let bus = MemoryBus::new();
        bus.create_topic("test", 3).await.unwrap();
        let mut last = HashMap::new();
        for n in 0..3000 {
            let key = (1000 + n % 100).to_string();
            let ack = bus.send("test", &key, Vec::new()).await.unwrap();
            let expected = last.get(&ack.partition).map_or(0, |offset| offset + 1);
            assert_eq!(ack.offset, expected);
            last.insert(ack.partition, ack.offset);
        }
        let total: i64 = last.values().map(|offset| offset + 1).sum();
        assert_eq!(total, 3000);
    }

    #[tokio::test]
    async fn test_retention_keeps_latest_messages() {
        let bus = MemoryBus::with_retention(2);
        for payload in ["a", "b", "c", "d"] {
            bus.send("test", "1", payload.as_bytes().to_vec()).await.unwrap();
        }
        let ack = bus.send("test", "1", b"e".to_vec()).await.unwrap();

        assert_eq!(ack.offset, 4);
        assert_eq!(bus.payloads("test"), vec!["d", "e"]);
        assert_eq!(bus.delivered_count(), 5);

        let silent = MemoryBus::with_retention(0);
        silent.send("test", "1", b"a".to_vec()).await.unwrap();
        assert!(silent.delivered().is_empty());
        assert_eq!(silent.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let bus = MemoryBus::new();
        bus.fail_with("broker down");
        let err = bus.send("test", "1", Vec::new()).await.unwrap_err();
        assert_eq!(err, BusError::Publish("broker down".to_string()));
        assert!(bus.delivered().is_empty());
        assert_eq!(bus.attempts(), 1);

        bus.recover();
        assert!(bus.send("test", "1", Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_topic_is_idempotent() {
        let bus = MemoryBus::new();
        bus.create_topic("test", 3).await.unwrap();
        bus.create_topic("test", 5).await.unwrap();
        assert_eq!(bus.partitions("test"), Some(3));
        assert!(bus.create_topic("bad", 0).await.is_err());
    }
}
