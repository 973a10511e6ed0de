//! The bus collaborator interface.

use crate::error::Result;
use async_trait::async_trait;

/// Broker acknowledgement of one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}

/// A topic-based message bus.
///
/// Implementations are shared across tasks; the publisher sends concurrently
/// through one client.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Deliver `payload` to `topic`, partitioned by `key`.
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Ack>;

    /// Create `topic` unless it already exists.
    async fn create_topic(&self, topic: &str, partitions: i32) -> Result<()>;
}
