//! Records, clip events and counter buckets.

use crate::schema::{COUPONS, PERSONALIZED_DEALS};
use crate::values::{Row, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload literal written into every seeded record.
pub const SEED_PAYLOAD: &str = "coupon data";

/// Width of a clip event bucket in seconds.
pub const BUCKET_SECONDS: i64 = 3600;

/// Error decoding a record from a result row.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Column '{0}' missing from row")]
    MissingColumn(&'static str),

    #[error("Column '{column}' has unexpected {actual} value")]
    UnexpectedType {
        column: &'static str,
        actual: &'static str,
    },
}

/// The two record families. They share a shape and differ only in what the
/// partition key means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFamily {
    /// Coupons partitioned by zip code.
    ByZip,
    /// Personalized deals partitioned by household.
    ByHousehold,
}

impl RecordFamily {
    pub const ALL: [RecordFamily; 2] = [RecordFamily::ByZip, RecordFamily::ByHousehold];

    /// Container holding this family.
    pub fn container(&self) -> &'static str {
        match self {
            RecordFamily::ByZip => COUPONS,
            RecordFamily::ByHousehold => PERSONALIZED_DEALS,
        }
    }

    /// Name of the partition key column.
    pub fn partition_column(&self) -> &'static str {
        match self {
            RecordFamily::ByZip => "zip",
            RecordFamily::ByHousehold => "household_id",
        }
    }

    /// Columns of a full record insert, in bind order.
    pub fn insert_columns(&self) -> [&'static str; 6] {
        [
            self.partition_column(),
            "offer_id",
            "data",
            "liked",
            "clipped",
            "updated",
        ]
    }
}

impl fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.container())
    }
}

/// A coupon or deal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub partition_key: String,
    pub clustering_key: String,
    pub payload: String,
    pub liked: bool,
    pub clipped: bool,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// A fresh, unclipped seed record.
    pub fn seed(
        partition_key: impl Into<String>,
        clustering_key: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            clustering_key: clustering_key.into(),
            payload: SEED_PAYLOAD.to_string(),
            liked: false,
            clipped: false,
            updated_at,
        }
    }

    /// Parameters for the full-record insert, in [`RecordFamily::insert_columns`] order.
    pub fn to_params(&self) -> Vec<Value> {
        vec![
            Value::from(self.partition_key.as_str()),
            Value::from(self.clustering_key.as_str()),
            Value::from(self.payload.as_str()),
            Value::from(self.liked),
            Value::from(self.clipped),
            Value::from(self.updated_at),
        ]
    }

    /// Decode a record of `family` from a result row.
    ///
    /// Rows created by a clip upsert never had `data` or `liked` written; those
    /// read as empty and false.
    pub fn from_row(family: RecordFamily, row: &Row) -> Result<Self, RecordError> {
        let partition_key = required_text(row, family.partition_column())?;
        let clustering_key = required_text(row, "offer_id")?;
        let payload = optional(row, "data", Value::as_str)?
            .unwrap_or_default()
            .to_string();
        let liked = optional(row, "liked", Value::as_bool)?.unwrap_or(false);
        let clipped = optional(row, "clipped", Value::as_bool)?.unwrap_or(false);
        let updated_at = optional(row, "updated", |v| v.as_timestamp().copied())?
            .ok_or(RecordError::MissingColumn("updated"))?;

        Ok(Self {
            partition_key,
            clustering_key,
            payload,
            liked,
            clipped,
            updated_at,
        })
    }
}

fn required_text(row: &Row, column: &'static str) -> Result<String, RecordError> {
    optional(row, column, Value::as_str)?
        .map(str::to_string)
        .ok_or(RecordError::MissingColumn(column))
}

fn optional<'a, T>(
    row: &'a Row,
    column: &'static str,
    extract: impl Fn(&'a Value) -> Option<T>,
) -> Result<Option<T>, RecordError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => extract(value).map(Some).ok_or(RecordError::UnexpectedType {
            column,
            actual: value.kind(),
        }),
    }
}

/// One clip action: a shopper in `zip` clipped offer `entity_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipEvent {
    pub entity_id: String,
    pub zip: String,
    pub bucket: i64,
    pub occurred_at: DateTime<Utc>,
}

impl ClipEvent {
    pub fn new(
        zip: impl Into<String>,
        entity_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            zip: zip.into(),
            bucket: bucket_for(occurred_at),
            occurred_at,
        }
    }

    /// Parameters for the partial clip update: zip, offer id, clipped, updated.
    pub fn clip_params(&self) -> Vec<Value> {
        vec![
            Value::from(self.zip.as_str()),
            Value::from(self.entity_id.as_str()),
            Value::from(true),
            Value::from(self.occurred_at),
        ]
    }
}

/// Hour bucket of a timestamp.
pub fn bucket_for(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(BUCKET_SECONDS)
}

/// A pre-aggregated clip counter. Maintained by downstream consumers of the
/// clip stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterBucket {
    pub entity_id: String,
    pub bucket: i64,
    pub count: i64,
}
