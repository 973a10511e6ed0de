//! Core types for the loyalty clip ingestion pipeline.
//!
//! This crate provides the types shared by every other crate in the
//! workspace:
//!
//! - [`Keyspace`] / [`Container`] - the loyalty keyspace and its key layout
//! - [`Value`] / [`Row`] / [`ResultSet`] - store-neutral bound values and rows
//! - [`Record`] / [`RecordFamily`] - coupon and deal records
//! - [`ClipEvent`] / [`CounterBucket`] - the clip stream and its aggregates
//!
//! # Architecture
//!
//! ```text
//! loyalty-core (this crate)
//!    │
//!    ├─── loyalty-generator  (seed rows, clip events)
//!    ├─── loyalty-store      (dialects, statement cache, dispatcher, stores)
//!    └─── loyalty-bus        (clip messages, publisher, buses)
//! ```

pub mod record;
pub mod schema;
pub mod values;

pub use record::{
    bucket_for, ClipEvent, CounterBucket, Record, RecordError, RecordFamily, SEED_PAYLOAD,
};
pub use schema::{Column, Container, Keyspace, SchemaError, KEYSPACE};
pub use values::{ColumnType, ResultSet, Row, Value};
