//! Container definitions for the loyalty keyspace.
//!
//! The keyspace is defined once here and rendered into store-specific DDL by
//! the dialects in `loyalty-store`. Keys follow the wide-column layout: a
//! (possibly composite) partition key followed by zero or more clustering
//! columns.

use crate::values::ColumnType;
use serde::{Deserialize, Serialize};

/// Name of the keyspace every container lives in.
pub const KEYSPACE: &str = "loyalty";

pub const COUPONS: &str = "coupons";
pub const PERSONALIZED_DEALS: &str = "personalized_deals";
pub const COUPON_COUNTERS: &str = "coupon_counters";
pub const COUPON_EVENTS: &str = "coupon_events";

/// Error type for schema lookups.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Column '{column}' not found in container '{container}'")]
    ColumnNotFound { container: String, column: String },
}

/// A single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A table-like container with its key layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Columns forming the partition key, in order.
    pub partition_key: Vec<String>,
    /// Columns ordering rows within a partition, in order.
    pub clustering_key: Vec<String>,
}

impl Container {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_type(&self, name: &str) -> Result<ColumnType, SchemaError> {
        self.column(name)
            .map(|c| c.column_type)
            .ok_or_else(|| SchemaError::ColumnNotFound {
                container: self.name.clone(),
                column: name.to_string(),
            })
    }

    /// Partition key columns followed by clustering columns.
    pub fn primary_key(&self) -> impl Iterator<Item = &str> {
        self.partition_key
            .iter()
            .chain(self.clustering_key.iter())
            .map(String::as_str)
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key().any(|k| k == name)
    }
}

/// A keyspace: a named set of containers created and dropped together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyspace {
    pub name: String,
    pub containers: Vec<Container>,
}

impl Keyspace {
    /// The loyalty keyspace: coupons, personalized deals, counters and the
    /// clip event log.
    pub fn loyalty() -> Self {
        Self {
            name: KEYSPACE.to_string(),
            containers: vec![
                record_container(COUPONS, "zip"),
                record_container(PERSONALIZED_DEALS, "household_id"),
                Container {
                    name: COUPON_COUNTERS.to_string(),
                    columns: vec![
                        Column::new("offer_id", ColumnType::Text),
                        Column::new("bucket", ColumnType::BigInt),
                        Column::new("count", ColumnType::BigInt),
                    ],
                    partition_key: vec!["offer_id".to_string()],
                    clustering_key: vec!["bucket".to_string()],
                },
                Container {
                    name: COUPON_EVENTS.to_string(),
                    columns: vec![
                        Column::new("offer_id", ColumnType::Text),
                        Column::new("bucket", ColumnType::BigInt),
                        Column::new("count", ColumnType::BigInt),
                        Column::new("time", ColumnType::Timestamp),
                    ],
                    partition_key: vec!["offer_id".to_string(), "bucket".to_string()],
                    clustering_key: vec!["time".to_string()],
                },
            ],
        }
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn get_container(&self, name: &str) -> Result<&Container, SchemaError> {
        self.container(name)
            .ok_or_else(|| SchemaError::ContainerNotFound(name.to_string()))
    }

    pub fn container_names(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.name.as_str()).collect()
    }
}

fn record_container(name: &str, partition_column: &str) -> Container {
    Container {
        name: name.to_string(),
        columns: vec![
            Column::new(partition_column, ColumnType::Text),
            Column::new("offer_id", ColumnType::Text),
            Column::new("data", ColumnType::Text),
            Column::new("liked", ColumnType::Boolean),
            Column::new("clipped", ColumnType::Boolean),
            Column::new("updated", ColumnType::Timestamp),
        ],
        partition_key: vec![partition_column.to_string()],
        clustering_key: vec!["offer_id".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loyalty_keyspace_layout() {
        let ks = Keyspace::loyalty();
        assert_eq!(ks.name, "loyalty");
        assert_eq!(
            ks.container_names(),
            vec![COUPONS, PERSONALIZED_DEALS, COUPON_COUNTERS, COUPON_EVENTS]
        );

        let deals = ks.get_container(PERSONALIZED_DEALS).unwrap();
        assert_eq!(deals.partition_key, vec!["household_id"]);
        assert_eq!(deals.clustering_key, vec!["offer_id"]);

        let events = ks.get_container(COUPON_EVENTS).unwrap();
        assert_eq!(
            events.primary_key().collect::<Vec<_>>(),
            vec!["offer_id", "bucket", "time"]
        );
        assert_eq!(events.column_type("time").unwrap(), ColumnType::Timestamp);
    }

    #[test]
    fn test_unknown_container() {
        let ks = Keyspace::loyalty();
        assert!(matches!(
            ks.get_container("nope"),
            Err(SchemaError::ContainerNotFound(_))
        ));
        let coupons = ks.get_container(COUPONS).unwrap();
        assert!(coupons.column_type("household_id").is_err());
        assert!(coupons.is_key_column("zip"));
        assert!(!coupons.is_key_column("clipped"));
    }
}
