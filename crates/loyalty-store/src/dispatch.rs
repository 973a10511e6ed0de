//! Asynchronous write dispatch.
//!
//! The dispatcher binds parameters against a prepared template, hands the
//! statement to the session and returns a [`WriteHandle`] immediately. It
//! never waits for the store. Writes submitted in sequence may complete in
//! any order; a caller that needs ordering awaits each handle before issuing
//! the next submission.

use crate::error::{Result, StoreError};
use crate::handle::WriteHandle;
use crate::session::StoreSession;
use crate::statement::StatementHandle;
use loyalty_core::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct DispatchStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    bind_errors: AtomicU64,
    in_flight: AtomicU64,
    idle: Notify,
}

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Statements handed to the store.
    pub submitted: u64,
    /// Statements that completed successfully.
    pub succeeded: u64,
    /// Statements that completed with `WriteFailed`.
    pub failed: u64,
    /// Submissions rejected before reaching the store.
    pub bind_errors: u64,
    /// Submitted but not yet terminal.
    pub in_flight: u64,
}

/// Submits bound statements through a shared session.
pub struct WriteDispatcher<S: StoreSession> {
    session: Arc<S>,
    stats: Arc<DispatchStats>,
}

impl<S: StoreSession> Clone for WriteDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S: StoreSession> WriteDispatcher<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Bind `params` to `statement` and submit it.
    ///
    /// Returns without waiting for the store. Arity or type mismatches fail
    /// with [`StoreError::Bind`] and a closed session fails with
    /// [`StoreError::SessionClosed`]; in both cases nothing reaches the store.
    pub fn submit(
        &self,
        statement: &StatementHandle<S::Statement>,
        params: Vec<Value>,
    ) -> Result<WriteHandle> {
        if let Err(e) = statement.check_params(&params) {
            self.stats.bind_errors.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let future = self.session.submit(statement.statement(), params)?;

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.stats.in_flight.fetch_add(1, Ordering::AcqRel);
        let handle = WriteHandle::spawn(future);

        let on_ok = Arc::clone(&self.stats);
        let on_err = Arc::clone(&self.stats);
        handle.on_complete(
            move |_| {
                on_ok.succeeded.fetch_add(1, Ordering::Relaxed);
                finish(&on_ok);
            },
            move |err| {
                trace!("Write failed: {}", err);
                on_err.failed.fetch_add(1, Ordering::Relaxed);
                finish(&on_err);
            },
        );
        Ok(handle)
    }

    /// Submit and wait for the result. Used by the sequential read path.
    pub async fn submit_and_wait(
        &self,
        statement: &StatementHandle<S::Statement>,
        params: Vec<Value>,
    ) -> Result<loyalty_core::ResultSet> {
        self.submit(statement, params)?.resolve().await
    }

    /// Wait until every submitted statement is terminal.
    pub async fn drain(&self) {
        loop {
            let idle = self.stats.idle.notified();
            if self.stats.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.stats.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            bind_errors: self.stats.bind_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}

fn finish(stats: &DispatchStats) {
    if stats.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
        stats.idle.notify_waiters();
    }
}

/// Whether `err` is local to one operation: logged and counted while the run
/// continues.
pub fn is_per_write(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Bind(_) | StoreError::WriteFailed(_) | StoreError::SessionClosed
    )
}
