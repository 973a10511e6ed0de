//! The storage collaborator interface.

use crate::dialect::Dialect;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use loyalty_core::{ColumnType, ResultSet, Value};

/// A write (or read) that has been handed to the store and will complete on
/// the store's own concurrency machinery.
pub type WriteFuture = BoxFuture<'static, Result<ResultSet>>;

/// A statement as prepared by the store, plus the parameter shape it expects.
#[derive(Debug, Clone)]
pub struct Prepared<T> {
    pub statement: T,
    pub param_types: Vec<ColumnType>,
}

/// An open session against a store.
///
/// Implementations must be safe to share across tasks: the dispatcher submits
/// concurrently through one session without caller-side locking.
///
/// # Usage Pattern
///
/// The pipeline is generic over the session so the CLI branches once on the
/// configured store and everything after that is statically dispatched:
///
/// ```ignore
/// pub async fn run_simulation<S: StoreSession, B: MessageBus>(
///     session: Arc<S>,
///     bus: Arc<B>,
///     settings: &Settings,
/// ) -> anyhow::Result<RunMetrics> { /* ... */ }
/// ```
#[async_trait]
pub trait StoreSession: Send + Sync + 'static {
    /// Store-specific prepared statement handle.
    type Statement: Clone + Send + Sync + 'static;

    /// Dialect used to render statement text for this store.
    fn dialect(&self) -> &dyn Dialect;

    /// Whether [`StoreSession::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Run a schema/admin statement synchronously.
    async fn execute(&self, text: &str) -> Result<ResultSet>;

    /// Compile a parameterized template.
    async fn prepare(&self, text: &str) -> Result<Prepared<Self::Statement>>;

    /// Hand a bound statement to the store without waiting for it.
    ///
    /// Parameters have already been checked against the prepared shape. The
    /// only synchronous failure is [`StoreError::SessionClosed`](crate::StoreError::SessionClosed);
    /// everything else surfaces through the returned future.
    fn submit(&self, statement: &Self::Statement, params: Vec<Value>) -> Result<WriteFuture>;

    /// Release every connection. Later submissions fail with `SessionClosed`.
    async fn close(&self) -> Result<()>;
}
