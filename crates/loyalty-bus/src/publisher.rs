//! Clip event publisher.
//!
//! The publisher turns clip events into [`ClipMessage`]s and sends them on a
//! fixed topic. Publishing is independent of the store write for the same
//! event: a failed delivery is logged and counted, never propagated to the
//! write path, and a failed write never suppresses the message.

use crate::bus::{Ack, MessageBus};
use crate::error::Result;
use crate::message::ClipMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{trace, warn};

#[derive(Default)]
struct PublishStats {
    published: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
    idle: Notify,
}

impl PublishStats {
    fn record(&self, outcome: &Result<Ack>) {
        match outcome {
            Ok(_) => self.published.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn finish(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Counts one send as in flight until dropped, so a cancelled or panicked
/// send never blocks [`EventPublisher::flush`].
struct InFlight(Arc<PublishStats>);

impl InFlight {
    fn start(stats: &Arc<PublishStats>) -> Self {
        stats.in_flight.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(stats))
    }

    fn stats(&self) -> &PublishStats {
        &self.0
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Point-in-time publisher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSnapshot {
    pub published: u64,
    pub failed: u64,
    pub in_flight: u64,
}

/// Publishes clip messages to one topic.
pub struct EventPublisher<B: MessageBus> {
    bus: Arc<B>,
    topic: String,
    stats: Arc<PublishStats>,
}

impl<B: MessageBus> Clone for EventPublisher<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            topic: self.topic.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<B: MessageBus> EventPublisher<B> {
    pub fn new(bus: Arc<B>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            stats: Arc::new(PublishStats::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Send `message` without waiting for delivery.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, message: &ClipMessage) {
        let bus = Arc::clone(&self.bus);
        let topic = self.topic.clone();
        let key = message.key().to_string();
        let payload = message.to_payload();

        let in_flight = InFlight::start(&self.stats);
        tokio::spawn(async move {
            let outcome = bus.send(&topic, &key, payload).await;
            match &outcome {
                Ok(ack) => trace!(
                    "Published clip for offer {} to {}[{}]@{}",
                    key,
                    topic,
                    ack.partition,
                    ack.offset
                ),
                Err(e) => warn!("Failed to publish clip for offer {}: {}", key, e),
            }
            in_flight.stats().record(&outcome);
        });
    }

    /// Send `message` and wait for the broker's acknowledgement.
    pub async fn publish_ack(&self, message: &ClipMessage) -> Result<Ack> {
        let in_flight = InFlight::start(&self.stats);
        let outcome = self
            .bus
            .send(&self.topic, message.key(), message.to_payload())
            .await;
        in_flight.stats().record(&outcome);
        outcome
    }

    /// Wait until every fire-and-forget publish has been delivered or failed.
    pub async fn flush(&self) {
        loop {
            let idle = self.stats.idle.notified();
            if self.stats.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn snapshot(&self) -> PublishSnapshot {
        PublishSnapshot {
            published: self.stats.published.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            in_flight: self.stats.in_flight.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use crate::memory::MemoryBus;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    /// A bus whose sends never complete.
    struct StalledBus;

    #[async_trait]
    impl MessageBus for StalledBus {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn send(&self, _topic: &str, _key: &str, _payload: Vec<u8>) -> Result<Ack> {
            std::future::pending().await
        }

        async fn create_topic(&self, _topic: &str, _partitions: i32) -> Result<()> {
            Ok(())
        }
    }

    fn message(offer: &str) -> ClipMessage {
        ClipMessage::new(offer, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 1)
    }

    #[tokio::test]
    async fn test_publish_is_fire_and_forget() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = EventPublisher::new(bus.clone(), "test");
        for offer in ["1050", "1051", "1052"] {
            publisher.publish(&message(offer));
        }
        publisher.flush().await;

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.published, 3);
        assert_eq!(snapshot.in_flight, 0);
        let mut payloads = bus.payloads("test");
        payloads.sort();
        assert_eq!(payloads[0], "1050,2024-01-01 00:00:00,1");
        assert_eq!(payloads.len(), 3);
    }

    #[tokio::test]
    async fn test_publish_ack() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = EventPublisher::new(bus.clone(), "test");
        let ack = publisher.publish_ack(&message("1050")).await.unwrap();
        assert_eq!(ack.offset, 0);
        assert_eq!(bus.delivered()[0].key, "1050");
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let bus = Arc::new(MemoryBus::new());
        bus.fail_with("no brokers");
        let publisher = EventPublisher::new(bus.clone(), "test");
        for _ in 0..4 {
            publisher.publish(&message("1050"));
        }
        publisher.flush().await;
        assert_eq!(
            publisher.publish_ack(&message("1050")).await,
            Err(BusError::Publish("no brokers".to_string()))
        );

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.published, 0);
        assert_eq!(snapshot.failed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ack_does_not_block_flush() {
        let publisher = EventPublisher::new(Arc::new(StalledBus), "test");
        let msg = message("1050");
        let send = publisher.publish_ack(&msg);
        assert!(tokio::time::timeout(Duration::from_secs(5), send)
            .await
            .is_err());

        assert_eq!(publisher.snapshot().in_flight, 0);
        assert!(
            tokio::time::timeout(Duration::from_secs(5), publisher.flush())
                .await
                .is_ok()
        );
    }
}
