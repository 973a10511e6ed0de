//! loyalty-clips
//!
//! Seeds a partitioned store with coupon and personalized-deal records, then
//! simulates a paced stream of clip events. Each event is written to the
//! store without waiting for the result and mirrored as a message on a bus
//! topic for downstream consumers.
//!
//! # Crates
//!
//! - `loyalty_core` - records, clip events, values and the keyspace layout
//! - `loyalty_generator` - seed rows and seeded clip events
//! - `loyalty_store` - statement cache, write dispatcher, store adapters
//! - `loyalty_bus` - clip messages, publisher, bus adapters
//!
//! # CLI Usage
//!
//! ```bash
//! # Full simulation against the in-process store, publishing to Kafka
//! loyalty-clips simulate --iterations 1000
//!
//! # PostgreSQL store, no Kafka
//! loyalty-clips simulate --store postgres --nodes db1,db2 --pg-user loyalty --dry-run
//!
//! # Seed coupons and read every zip back sequentially
//! loyalty-clips load-read --settle 0
//! ```

pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod pacing;
pub mod pipeline;

pub use config::{RunOpts, Settings, StoreKind};
pub use metrics::RunMetrics;
pub use pacing::{PaceState, PacingController};
pub use pipeline::{run_load_read, run_simulation, Pipeline, ReadSummary};
