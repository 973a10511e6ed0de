//! Kafka bus adapter.

use crate::bus::{Ack, MessageBus};
use crate::error::{BusError, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, info};

/// Default partition count for topics created by [`KafkaBus::create_topic`].
pub const DEFAULT_PARTITIONS: i32 = 3;

/// Publishes to Kafka through a shared `FutureProducer`.
pub struct KafkaBus {
    producer: FutureProducer,
    brokers: String,
    delivery_timeout: Duration,
}

impl KafkaBus {
    /// Create a producer for `brokers` (e.g. `127.0.0.1:9092`).
    ///
    /// The producer connects lazily; an unreachable broker shows up as
    /// failed deliveries, not here.
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "30000")
            .set("queue.buffering.max.messages", "100000")
            .set("linger.ms", "5")
            .create()
            .map_err(|e| BusError::Connection(format!("failed to create producer: {e}")))?;

        info!("Kafka producer created for {}", brokers);
        Ok(Self {
            producer,
            brokers: brokers.to_string(),
            delivery_timeout: Duration::from_secs(30),
        })
    }

    /// How long a send may wait for queue space before failing.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Ack> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        let (partition, offset) = self
            .producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| BusError::Publish(err.to_string()))?;
        debug!(
            "Delivered to {} partition {} offset {}",
            topic, partition, offset
        );
        Ok(Ack { partition, offset })
    }

    async fn create_topic(&self, topic: &str, partitions: i32) -> Result<()> {
        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| BusError::Connection(format!("failed to create admin client: {e}")))?;

        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));

        let results = admin_client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| BusError::TopicCreation(format!("failed to create topic: {e}")))?;

        for result in results {
            match result {
                Ok(topic_name) => {
                    info!("Topic '{}' created successfully", topic_name);
                }
                Err((topic_name, err)) => {
                    let err_str = err.to_string();
                    if err_str.contains("already exists")
                        || err_str.contains("TopicExistsException")
                    {
                        info!("Topic '{}' already exists", topic_name);
                    } else {
                        return Err(BusError::TopicCreation(format!(
                            "failed to create topic {topic_name}: {err}"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_creation_is_lazy() {
        let bus = KafkaBus::new("127.0.0.1:1").unwrap();
        assert_eq!(bus.brokers(), "127.0.0.1:1");
        assert_eq!(bus.name(), "kafka");
    }
}
