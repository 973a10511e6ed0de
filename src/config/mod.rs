//! Configuration for runs.

pub mod duration;
pub mod settings;

pub use duration::parse_duration;
pub use settings::{RunOpts, Settings, StoreKind};
