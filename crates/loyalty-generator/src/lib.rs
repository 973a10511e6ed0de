//! Synthetic data for the loyalty clip pipeline.
//!
//! Two generators live here:
//!
//! - [`RowGenerator`] walks an outer x inner integer grid and yields one seed
//!   [`Record`](loyalty_core::Record) per cell. It performs no I/O and can be
//!   iterated any number of times.
//! - [`ClipGenerator`] draws clip targets (zip, offer) from a seeded RNG so a
//!   simulation run is reproducible for a given seed.
//!
//! # Example
//!
//! ```rust
//! use loyalty_core::RecordFamily;
//! use loyalty_generator::RowGenerator;
//!
//! let generator = RowGenerator::for_family(RecordFamily::ByZip);
//! assert_eq!(generator.len(), 1900);
//! let first = generator.rows().next().unwrap();
//! assert_eq!(first.partition_key, "90000");
//! ```

pub mod clips;
pub mod rows;

pub use clips::{ClipGenerator, DEFAULT_OFFER_RANGE, DEFAULT_ZIP_RANGE};
pub use rows::{GeneratorError, RowGenerator, SeedRows};
