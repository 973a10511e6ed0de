//! Store access for the loyalty clip pipeline.
//!
//! - [`StoreSession`] - the seam between the pipeline and a concrete store
//! - [`StatementCache`] - prepare-once templates, keyed by text
//! - [`WriteDispatcher`] - bind, submit and hand back a [`WriteHandle`] without
//!   waiting for the store
//! - [`MemoryStore`] - an in-process partitioned store speaking a CQL subset
//! - [`PostgresSession`] - PostgreSQL via tokio-postgres

pub mod dialect;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod memory;
pub mod postgres;
pub mod session;
pub mod statement;

pub use dialect::{CqlDialect, Dialect, PostgresDialect};
pub use dispatch::{is_per_write, DispatchSnapshot, WriteDispatcher};
pub use error::StoreError;
pub use handle::{WriteHandle, WriteResult};
pub use memory::{MemorySession, MemoryStatement, MemoryStore};
pub use postgres::{PostgresOptions, PostgresSession};
pub use session::{Prepared, StoreSession, WriteFuture};
pub use statement::{StatementCache, StatementHandle, Templates};
