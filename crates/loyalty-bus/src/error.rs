//! Error types for the bus adapters and the publisher.

use thiserror::Error;

/// Errors that can occur while publishing clip messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The client could not be created or the broker is unreachable.
    #[error("Bus connection error: {0}")]
    Connection(String),

    /// A message was not delivered. Independent of the store write.
    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Topic creation error: {0}")]
    TopicCreation(String),

    /// A payload did not match `offer_id,YYYY-MM-DD HH:MM:SS,count`.
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl From<rdkafka::error::KafkaError> for BusError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        BusError::Publish(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
