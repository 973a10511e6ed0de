//! Wire format of clip messages.
//!
//! A clip message is a single line of UTF-8 text:
//!
//! ```text
//! <offer_id>,<YYYY-MM-DD HH:MM:SS>,<count>
//! ```
//!
//! The timestamp is UTC with second precision. Every clip event publishes a
//! count of `1`; consumers aggregate per offer and hour bucket.

use crate::error::BusError;
use chrono::{DateTime, NaiveDateTime, Utc};
use loyalty_core::{bucket_for, ClipEvent};
use std::fmt;
use std::str::FromStr;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One clip, as published to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipMessage {
    pub entity_id: String,
    pub occurred_at: NaiveDateTime,
    pub count: i64,
}

impl ClipMessage {
    pub fn new(entity_id: impl Into<String>, occurred_at: DateTime<Utc>, count: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            occurred_at: occurred_at.naive_utc(),
            count,
        }
    }

    /// The message for one clip event.
    pub fn from_event(event: &ClipEvent) -> Self {
        Self::new(event.entity_id.clone(), event.occurred_at, 1)
    }

    /// Partitioning key: all messages for one offer share a partition.
    pub fn key(&self) -> &str {
        &self.entity_id
    }

    /// Hour bucket the message counts towards.
    pub fn bucket(&self) -> i64 {
        bucket_for(self.occurred_at.and_utc())
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, BusError> {
        std::str::from_utf8(payload)
            .map_err(|e| BusError::Malformed(e.to_string()))?
            .parse()
    }
}

impl fmt::Display for ClipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.entity_id,
            self.occurred_at.format(TIME_FORMAT),
            self.count
        )
    }
}

impl FromStr for ClipMessage {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim_end().splitn(3, ',');
        let (Some(entity_id), Some(time), Some(count)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(BusError::Malformed(format!("expected 3 fields: {s:?}")));
        };
        if entity_id.is_empty() {
            return Err(BusError::Malformed(format!("empty offer id: {s:?}")));
        }
        let occurred_at = NaiveDateTime::parse_from_str(time, TIME_FORMAT)
            .map_err(|e| BusError::Malformed(format!("time {time:?}: {e}")))?;
        let count = count
            .parse()
            .map_err(|e| BusError::Malformed(format!("count {count:?}: {e}")))?;

        Ok(Self {
            entity_id: entity_id.to_string(),
            occurred_at,
            count,
        })
    }
}
