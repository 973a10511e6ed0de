//! Clip event fan-out for the loyalty clip pipeline.
//!
//! Every clip written to the store is mirrored as a [`ClipMessage`] on a
//! topic. The [`EventPublisher`] sends through any [`MessageBus`]:
//! [`KafkaBus`] for a real broker, [`MemoryBus`] for tests and dry runs.
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use loyalty_bus::ClipMessage;
//!
//! let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! assert_eq!(ClipMessage::new("1050", at, 1).to_string(), "1050,2024-01-01 00:00:00,1");
//! ```

pub mod bus;
pub mod error;
pub mod kafka;
pub mod memory;
pub mod message;
pub mod publisher;

pub use bus::{Ack, MessageBus};
pub use error::BusError;
pub use kafka::{KafkaBus, DEFAULT_PARTITIONS};
pub use memory::{Delivered, MemoryBus};
pub use message::ClipMessage;
pub use publisher::{EventPublisher, PublishSnapshot};
