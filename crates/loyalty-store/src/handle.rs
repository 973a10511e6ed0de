//! Write handles: the eventual outcome of one submitted statement.

use crate::error::StoreError;
use crate::session::WriteFuture;
use loyalty_core::ResultSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Terminal result of a write.
pub type WriteResult = Result<ResultSet, StoreError>;

type Callback = Box<dyn FnOnce(&WriteResult) + Send>;

struct State {
    result: Option<WriteResult>,
    callbacks: Vec<Callback>,
}

struct Shared {
    state: Mutex<State>,
    done: watch::Sender<bool>,
}

/// Future-like handle to a submitted write.
///
/// A handle moves from pending to exactly one terminal state. Each registered
/// callback pair fires once, with either the success or the error branch.
/// Resolving an already terminal handle returns the cached result; no work is
/// reissued. Cloning shares the same underlying write.
#[derive(Clone)]
pub struct WriteHandle {
    shared: Arc<Shared>,
    done: watch::Receiver<bool>,
}

impl WriteHandle {
    fn pending() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    result: None,
                    callbacks: Vec::new(),
                }),
                done: tx,
            }),
            done: rx,
        }
    }

    /// Drive `future` on the runtime and return a handle to its outcome.
    ///
    /// Any error from the store is reported as [`StoreError::WriteFailed`].
    /// If the task ends without a result, because the store future panicked
    /// or the runtime shut down, the handle fails instead of staying pending.
    pub fn spawn(future: WriteFuture) -> Self {
        let handle = Self::pending();
        let completer = FailOnDrop(handle.clone());
        tokio::spawn(async move {
            let result = future.await.map_err(StoreError::into_write_failed);
            completer.0.complete(result);
        });
        handle
    }

    /// Record the terminal result. Returns `false` if the handle was already
    /// terminal, in which case `result` is discarded.
    pub(crate) fn complete(&self, result: WriteResult) -> bool {
        let callbacks = {
            let mut state = self.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.callbacks)
        };
        self.shared.done.send_replace(true);
        for callback in callbacks {
            callback(&result);
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a success/error callback pair.
    ///
    /// If the handle is already terminal the matching callback runs
    /// immediately on the calling task; otherwise it runs on the task that
    /// completes the write.
    pub fn on_complete<S, E>(&self, on_success: S, on_error: E)
    where
        S: FnOnce(&ResultSet) + Send + 'static,
        E: FnOnce(&StoreError) + Send + 'static,
    {
        let callback: Callback = Box::new(move |result: &WriteResult| match result {
            Ok(rows) => on_success(rows),
            Err(err) => on_error(err),
        });

        let ready = {
            let mut state = self.lock();
            match &state.result {
                Some(result) => Some((result.clone(), callback)),
                None => {
                    state.callbacks.push(callback);
                    None
                }
            }
        };
        if let Some((result, callback)) = ready {
            callback(&result);
        }
    }

    /// Wait for the terminal result.
    pub async fn resolve(&self) -> WriteResult {
        let mut done = self.done.clone();
        // The sender lives in `shared`, which this handle keeps alive, so the
        // channel cannot close while we wait.
        let _ = done.wait_for(|finished| *finished).await;
        self.try_result()
            .unwrap_or_else(|| Err(StoreError::WriteFailed("write abandoned".to_string())))
    }

    /// The terminal result if the write has finished.
    pub fn try_result(&self) -> Option<WriteResult> {
        self.lock().result.clone()
    }

    pub fn is_terminal(&self) -> bool {
        *self.done.borrow()
    }
}

/// Fails the handle when dropped, unless it already has a result.
struct FailOnDrop(WriteHandle);

impl Drop for FailOnDrop {
    fn drop(&mut self) {
        self.0.complete(Err(StoreError::WriteFailed(
            "write task ended without a result".to_string(),
        )));
    }
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.try_result() {
            None => "pending",
            Some(Ok(_)) => "succeeded",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("WriteHandle").field("state", &state).finish()
    }
}
